//! Password login and logout.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::{ApiClient, ApiErrorCode, Transport};
use crate::base64::{base64url_decode, base64url_encode};
use crate::crypto::{
    decrypt_master_key, decrypt_session_id, derive_key_v2, make_password_key, make_random_key,
    make_username_hash, verify_tsid, wrap_key, MegaRsaKey,
};
use crate::error::{AuthError, MegaError, Result};

use super::core::Session;

impl Session {
    /// Log in with email and password over `transport`.
    ///
    /// `us0` tells which key derivation the account uses; `us` returns the
    /// wrapped master key together with either an RSA-encrypted session id
    /// (`csid`) or a temporary session challenge (`tsid`).
    pub(crate) async fn login(
        email: &str,
        password: &str,
        transport: Arc<dyn Transport>,
    ) -> Result<Session> {
        let mut api = ApiClient::new(transport);
        let email = email.trim().to_lowercase();

        let pre_login = api
            .request(json!({"a": "us0", "user": email}))
            .await
            .map_err(login_error)?;
        let variant = pre_login.get("v").and_then(Value::as_i64).unwrap_or(1);

        let (password_key, user_hash) = if variant == 2 {
            let salt = pre_login
                .get("s")
                .and_then(Value::as_str)
                .ok_or(MegaError::InvalidResponse)?;
            let derived = derive_key_v2(password, &base64url_decode(salt)?)?;
            let mut password_key = [0u8; 16];
            password_key.copy_from_slice(&derived[..16]);
            (password_key, base64url_encode(&derived[16..]))
        } else {
            let password_key = make_password_key(password);
            let hash = make_username_hash(&email, &password_key);
            (password_key, base64url_encode(&hash))
        };
        debug!(variant, "pre-login complete");

        let response = api
            .request(json!({"a": "us", "user": email, "uh": user_hash}))
            .await
            .map_err(login_error)?;

        let k = response
            .get("k")
            .and_then(Value::as_str)
            .ok_or(MegaError::InvalidResponse)?;
        let master_key = decrypt_master_key(k, &password_key)?;

        let (session_id, rsa_key) = if let Some(tsid) = response.get("tsid").and_then(Value::as_str) {
            if !verify_tsid(tsid, &master_key)? {
                return Err(AuthError::InvalidCredentials.into());
            }
            (tsid.to_string(), None)
        } else {
            let privk = response
                .get("privk")
                .and_then(Value::as_str)
                .ok_or(MegaError::InvalidResponse)?;
            let csid = response
                .get("csid")
                .and_then(Value::as_str)
                .ok_or(MegaError::InvalidResponse)?;
            // A wrong password yields a master key that decrypts garbage.
            let rsa_key = MegaRsaKey::from_encrypted(privk, &master_key)
                .map_err(|_| MegaError::from(AuthError::InvalidCredentials))?;
            let sid = decrypt_session_id(csid, &rsa_key)
                .map_err(|_| MegaError::from(AuthError::InvalidCredentials))?;
            (sid, Some(rsa_key))
        };
        api.set_session_id(session_id);

        let user = api
            .request(json!({"a": "ug"}))
            .await
            .map_err(login_error)?;
        let user_handle = user
            .get("u")
            .and_then(Value::as_str)
            .ok_or(MegaError::InvalidResponse)?
            .to_string();
        let account_email = user
            .get("email")
            .and_then(Value::as_str)
            .unwrap_or(&email)
            .to_string();
        let name = user.get("name").and_then(Value::as_str).map(str::to_string);

        let mut session = Session::new(api, master_key, user_handle, account_email, name);
        session.rsa_key = rsa_key;
        info!(email = %session.email, "logged in");
        Ok(session)
    }

    /// Switch the account to `new_password`.
    ///
    /// The new password always uses PBKDF2 with a fresh salt. Only the
    /// wrapping of the master key changes, so node keys and this session
    /// stay valid.
    pub(crate) async fn change_password(&mut self, new_password: &str) -> Result<()> {
        if new_password.is_empty() {
            return Err(MegaError::InvalidArgument("password must not be empty".to_string()));
        }
        let salt = make_random_key();
        let derived = derive_key_v2(new_password, &salt)?;
        let mut password_key = [0u8; 16];
        password_key.copy_from_slice(&derived[..16]);

        self.api
            .request(json!({
                "a": "up",
                "k": base64url_encode(&wrap_key(&self.master_key, &password_key)?),
                "uh": base64url_encode(&derived[16..]),
                "s": base64url_encode(&salt),
            }))
            .await?;
        info!(email = %self.email, "password changed");
        Ok(())
    }

    /// Invalidate the session on the service and forget its id.
    pub(crate) async fn logout(&mut self) -> Result<()> {
        self.api.request(json!({"a": "sml"})).await?;
        self.api.clear_session_id();
        info!(email = %self.email, "logged out");
        Ok(())
    }
}

/// Map failures during login onto [`AuthError`].
fn login_error(err: MegaError) -> MegaError {
    match &err {
        MegaError::Network(msg) => AuthError::Network(msg.clone()).into(),
        MegaError::Http(status) => AuthError::Network(format!("HTTP {}", status)).into(),
        MegaError::RateLimited => AuthError::Network("service busy".to_string()).into(),
        _ => match err.api_code() {
            Some(ApiErrorCode::NotExist) | Some(ApiErrorCode::Args) => {
                AuthError::InvalidCredentials.into()
            }
            Some(ApiErrorCode::Blocked) | Some(ApiErrorCode::TooManyIps) => {
                AuthError::AccountBlocked.into()
            }
            _ => err,
        },
    }
}
