//! Identity provider seam: account creation and password authentication.
//! Session lifecycle lives in [`super::session`]; the gate composes both.

use std::path::{Path, PathBuf};

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use polars::prelude::*;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::principal::Identity;

/// Minimum password length accepted at account creation.
const MIN_PASSWORD_LEN: usize = 6;

pub trait IdentityProvider: Send + Sync {
    /// Create an account for a new email. Rejects duplicate emails and weak
    /// passwords with a `Credential` error; neither is retried.
    fn create_account(&self, email: &str, password: &str) -> AppResult<Identity>;

    /// Verify email + password and return the stored identity.
    fn authenticate(&self, email: &str, password: &str) -> AppResult<Identity>;
}

/// Parquet-backed account table under the data root, one row per identity.
pub struct LocalIdentityProvider {
    root: PathBuf,
}

fn accounts_path(root: &Path) -> PathBuf {
    root.join("accounts.parquet")
}

fn mk_schema_df() -> DataFrame {
    let ids: Series = Series::new("user_id".into(), Vec::<String>::new());
    let emails: Series = Series::new("email".into(), Vec::<String>::new());
    let hashes: Series = Series::new("password_hash".into(), Vec::<String>::new());
    let created: Series = Series::new("created_at".into(), Vec::<i64>::new());
    DataFrame::new(vec![ids.into(), emails.into(), hashes.into(), created.into()]).unwrap()
}

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("salt_error".to_string(), e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("salt_error".to_string(), e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::internal("hash_error".to_string(), e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

fn read_accounts(path: &Path) -> AppResult<DataFrame> {
    if !path.exists() {
        return Ok(mk_schema_df());
    }
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| AppError::io("accounts_read".to_string(), e.to_string()))?;
    Ok(df)
}

fn write_accounts(path: &Path, mut df: DataFrame) -> AppResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    let mut f = std::fs::File::create(path)?;
    ParquetWriter::new(&mut f)
        .finish(&mut df)
        .map_err(|e| AppError::io("accounts_write".to_string(), e.to_string()))?;
    Ok(())
}

fn str_at(df: &DataFrame, col: &str, i: usize) -> AppResult<String> {
    let v = df
        .column(col)
        .and_then(|c| c.get(i))
        .map_err(|e| AppError::internal("accounts_column".to_string(), e.to_string()))?;
    Ok(match v {
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        _ => String::new(),
    })
}

impl LocalIdentityProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn find_row(&self, df: &DataFrame, email: &str) -> AppResult<Option<usize>> {
        for i in 0..df.height() {
            // Emails compare case-insensitively; the stored casing is preserved.
            if str_at(df, "email", i)?.eq_ignore_ascii_case(email) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }
}

impl IdentityProvider for LocalIdentityProvider {
    fn create_account(&self, email: &str, password: &str) -> AppResult<Identity> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(AppError::credential("invalid_email", "a valid email address is required"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AppError::credential(
                "weak_password",
                "password must be at least 6 characters",
            ));
        }
        let path = accounts_path(&self.root);
        let df = read_accounts(&path)?;
        if self.find_row(&df, email)?.is_some() {
            return Err(AppError::credential("duplicate_email", "email is already registered"));
        }
        let id = Uuid::new_v4();
        let hash = hash_password(password)?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let new = DataFrame::new(vec![
            Series::new("user_id".into(), vec![id.to_string()]).into(),
            Series::new("email".into(), vec![email.to_string()]).into(),
            Series::new("password_hash".into(), vec![hash]).into(),
            Series::new("created_at".into(), vec![now_ms]).into(),
        ])
        .map_err(|e| AppError::internal("accounts_frame".to_string(), e.to_string()))?;
        if df.height() == 0 {
            write_accounts(&path, new)?;
        } else {
            let stacked = df
                .vstack(&new)
                .map_err(|e| AppError::internal("accounts_frame".to_string(), e.to_string()))?;
            write_accounts(&path, stacked)?;
        }
        Ok(Identity { id, email: email.to_string() })
    }

    fn authenticate(&self, email: &str, password: &str) -> AppResult<Identity> {
        let path = accounts_path(&self.root);
        let df = read_accounts(&path)?;
        let Some(i) = self.find_row(&df, email.trim())? else {
            return Err(AppError::credential("invalid_credentials", "invalid email or password"));
        };
        let hash = str_at(&df, "password_hash", i)?;
        if !verify_password(&hash, password) {
            return Err(AppError::credential("invalid_credentials", "invalid email or password"));
        }
        let id_str = str_at(&df, "user_id", i)?;
        let id = Uuid::parse_str(&id_str)
            .map_err(|e| AppError::internal("accounts_id".to_string(), e.to_string()))?;
        Ok(Identity { id, email: str_at(&df, "email", i)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_authenticate() {
        let tmp = tempdir().unwrap();
        let p = LocalIdentityProvider::new(tmp.path());
        let id = p.create_account("alice@example.com", "secret1").unwrap();
        let back = p.authenticate("alice@example.com", "secret1").unwrap();
        assert_eq!(back.id, id.id);
        assert_eq!(back.email, "alice@example.com");
    }

    #[test]
    fn rejects_duplicate_email_and_weak_password() {
        let tmp = tempdir().unwrap();
        let p = LocalIdentityProvider::new(tmp.path());
        p.create_account("bob@example.com", "secret1").unwrap();
        let dup = p.create_account("BOB@example.com", "another1");
        assert!(matches!(dup, Err(AppError::Credential { .. })));
        let weak = p.create_account("carol@example.com", "short");
        assert!(matches!(weak, Err(AppError::Credential { .. })));
    }

    #[test]
    fn wrong_password_fails() {
        let tmp = tempdir().unwrap();
        let p = LocalIdentityProvider::new(tmp.path());
        p.create_account("dave@example.com", "secret1").unwrap();
        assert!(p.authenticate("dave@example.com", "wrong1").is_err());
        assert!(p.authenticate("nobody@example.com", "secret1").is_err());
    }
}
