//! RSA private-key operations.
//!
//! MEGA accounts carry an RSA key with public exponent 3. The private half
//! decrypts the login `csid` and share keys sent by other users; the public
//! half of a contact's key encrypts share keys sent to them.

use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};

use rand::RngCore;

use super::aes::aes128_ecb_decrypt;
use crate::base64::base64url_decode;
use crate::error::{MegaError, Result};

/// RSA private key in MEGA's CRT layout.
#[derive(Debug, Clone)]
pub struct MegaRsaKey {
    /// Prime factor p
    pub p: BigUint,
    /// Prime factor q
    pub q: BigUint,
    /// Private exponent d
    pub d: BigUint,
    /// CRT coefficient: p^-1 mod q
    pub u: BigUint,
    /// Modulus n = p * q
    pub m: BigUint,
    /// Public exponent (always 3)
    pub e: BigUint,
}

impl MegaRsaKey {
    /// Build a key from its primes, deriving `d` and `u`.
    pub fn from_primes(p: BigUint, q: BigUint) -> Result<Self> {
        let e = BigUint::from(3u32);
        let phi = (&p - BigUint::one()) * (&q - BigUint::one());
        let d = mod_inverse(&e, &phi)
            .ok_or_else(|| MegaError::Crypto("e is not invertible mod phi".to_string()))?;
        let u = mod_inverse(&p, &q)
            .ok_or_else(|| MegaError::Crypto("p is not invertible mod q".to_string()))?;
        let m = &p * &q;
        Ok(MegaRsaKey { p, q, d, u, m, e })
    }

    /// Parse the unencrypted MPI sequence `p, q, d, u`.
    pub fn from_private_mpis(blob: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let p = read_mpi(blob, &mut pos)?;
        let q = read_mpi(blob, &mut pos)?;
        let d = read_mpi(blob, &mut pos)?;
        let u = read_mpi(blob, &mut pos)?;
        if p.is_zero() || q.is_zero() {
            return Err(MegaError::Crypto("degenerate RSA key".to_string()));
        }
        let m = &p * &q;
        Ok(MegaRsaKey {
            p,
            q,
            d,
            u,
            m,
            e: BigUint::from(3u32),
        })
    }

    /// Decrypt the `privk` attribute (AES-ECB under the master key).
    pub fn from_encrypted(privk_b64: &str, master_key: &[u8; 16]) -> Result<Self> {
        let encrypted = base64url_decode(privk_b64)?;
        let blob = aes128_ecb_decrypt(&encrypted, master_key)?;
        Self::from_private_mpis(&blob)
    }

    /// Serialize `p, q, d, u` as MPIs (the plaintext of `privk`).
    pub fn to_private_mpis(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for n in [&self.p, &self.q, &self.d, &self.u] {
            append_mpi(&mut out, n);
        }
        out
    }

    /// c^d mod n using the CRT split.
    pub fn decrypt_int(&self, c: &BigUint) -> BigUint {
        let one = BigUint::one();
        let xp = (c % &self.p).modpow(&(&self.d % (&self.p - &one)), &self.p);
        let xq = (c % &self.q).modpow(&(&self.d % (&self.q - &one)), &self.q);

        // t = (xq - xp) * u mod q
        let t = if xq >= xp {
            ((&xq - &xp) * &self.u) % &self.q
        } else {
            let tmp = ((&xp - &xq) * &self.u) % &self.q;
            if tmp.is_zero() {
                tmp
            } else {
                &self.q - tmp
            }
        };
        t * &self.p + xp
    }

    /// m^e mod n.
    pub fn encrypt_int(&self, m: &BigUint) -> BigUint {
        m.modpow(&self.e, &self.m)
    }

    /// Decrypt an MPI-encoded ciphertext, returning the big-endian plaintext.
    pub fn decrypt_mpi(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut pos = 0;
        let c = read_mpi(data, &mut pos)?;
        Ok(self.decrypt_int(&c).to_bytes_be())
    }

    /// Recover a `len`-byte key encrypted with [`RsaPublicKey::encrypt_key`].
    pub fn decrypt_key(&self, data: &[u8], len: usize) -> Result<Vec<u8>> {
        let plain = self.decrypt_mpi(data)?;
        let width = padded_len(&self.m);
        if plain.len() > width || len > width {
            return Err(MegaError::Crypto("RSA plaintext out of range".to_string()));
        }
        let mut padded = vec![0u8; width - plain.len()];
        padded.extend_from_slice(&plain);
        padded.truncate(len);
        Ok(padded)
    }

    pub fn public_key(&self) -> RsaPublicKey {
        RsaPublicKey {
            m: self.m.clone(),
            e: self.e.clone(),
        }
    }
}

/// Public half of an account key, as published through the `uk` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    pub m: BigUint,
    pub e: BigUint,
}

impl RsaPublicKey {
    /// Parse the MPI pair `m, e`.
    pub fn from_mpis(blob: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let m = read_mpi(blob, &mut pos)?;
        let e = read_mpi(blob, &mut pos)?;
        if padded_len(&m) < 16 || e.is_zero() {
            return Err(MegaError::Crypto("unusable RSA public key".to_string()));
        }
        Ok(RsaPublicKey { m, e })
    }

    pub fn to_mpis(&self) -> Vec<u8> {
        let mut out = Vec::new();
        append_mpi(&mut out, &self.m);
        append_mpi(&mut out, &self.e);
        out
    }

    /// Encrypt a symmetric key for the owner of this key.
    ///
    /// The key is followed by random bytes up to one byte short of the
    /// modulus; the ciphertext is MPI-encoded.
    pub fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let width = padded_len(&self.m);
        if key.len() > width {
            return Err(MegaError::Crypto("key longer than RSA modulus".to_string()));
        }
        let mut padded = vec![0u8; width];
        padded[..key.len()].copy_from_slice(key);
        rand::thread_rng().fill_bytes(&mut padded[key.len()..]);
        let c = BigUint::from_bytes_be(&padded).modpow(&self.e, &self.m);
        let mut out = Vec::new();
        append_mpi(&mut out, &c);
        Ok(out)
    }
}

/// Plaintext width that always stays below `m`.
fn padded_len(m: &BigUint) -> usize {
    (m.bits() as usize).div_ceil(8).saturating_sub(1)
}

/// Append `n` as a 16-bit bit-length prefix followed by big-endian bytes.
pub fn append_mpi(buf: &mut Vec<u8>, n: &BigUint) {
    let bits = n.bits() as u16;
    buf.extend_from_slice(&bits.to_be_bytes());
    if !n.is_zero() {
        buf.extend_from_slice(&n.to_bytes_be());
    }
}

/// Read one MPI at `pos`, advancing it.
pub fn read_mpi(data: &[u8], pos: &mut usize) -> Result<BigUint> {
    let header = data
        .get(*pos..*pos + 2)
        .ok_or_else(|| MegaError::Crypto("MPI truncated".to_string()))?;
    let bit_len = u16::from_be_bytes([header[0], header[1]]) as usize;
    let byte_len = bit_len.div_ceil(8);
    *pos += 2;

    let bytes = data
        .get(*pos..*pos + byte_len)
        .ok_or_else(|| MegaError::Crypto("MPI data truncated".to_string()))?;
    *pos += byte_len;
    Ok(BigUint::from_bytes_be(bytes))
}

fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let a = BigInt::from_biguint(Sign::Plus, a.clone());
    let m = BigInt::from_biguint(Sign::Plus, m.clone());
    let egcd = a.extended_gcd(&m);
    if !egcd.gcd.is_one() {
        return None;
    }
    egcd.x.mod_floor(&m).to_biguint()
}
