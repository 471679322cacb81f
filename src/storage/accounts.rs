//! Account and recovery-code storage. Recovery codes are modeled as an
//! opaque per-account set: operations take an account id rather than
//! holding a reference, since the graph is a simple one-to-many.

use rusqlite::params;

use super::{map_sqlite_err, Store};
use crate::error::{NvrError, Result};
use crate::secrets::verify_password;

#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub password_hash: String,
    pub otp_secret: String,
    pub use_otp: bool,
}

impl Store {
    pub fn create_account(&self, account: &Account) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO accounts (id, passwd, otp_secret, use_otp) VALUES (?1, ?2, ?3, ?4)",
            params![account.id, account.password_hash, account.otp_secret, account.use_otp as i64],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    pub fn get_account_by_id(&self, id: &str) -> Result<Account> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, passwd, otp_secret, use_otp FROM accounts WHERE id = ?1",
            params![id],
            |row| {
                Ok(Account {
                    id: row.get(0)?,
                    password_hash: row.get(1)?,
                    otp_secret: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    use_otp: row.get::<_, i64>(3)? != 0,
                })
            },
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => NvrError::NotFound(format!("account {id}")),
            other => map_sqlite_err(other),
        })
    }

    pub fn set_otp_secret(&self, id: &str, secret: &str) -> Result<()> {
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "UPDATE accounts SET otp_secret = ?1 WHERE id = ?2",
                params![secret, id],
            )
            .map_err(map_sqlite_err)?;
        if affected == 0 {
            return Err(NvrError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    pub fn store_hashed_recovery_codes(&self, id: &str, hashes: &[String]) -> Result<()> {
        let conn = self.conn.lock();
        for hash in hashes {
            conn.execute(
                "INSERT INTO recovery_codes (id, code, used) VALUES (?1, ?2, 0)",
                params![id, hash],
            )
            .map_err(map_sqlite_err)?;
        }
        Ok(())
    }

    pub fn list_unused_recovery_hashes(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT code FROM recovery_codes WHERE id = ?1 AND used = 0")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![id], |row| row.get::<_, String>(0))
            .map_err(map_sqlite_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_sqlite_err)
    }

    /// Verify `plaintext_code` against each of the account's unused hashes
    /// in turn; on a match, atomically flip that row's `used` to 1. Returns
    /// `true` only if a matching, still-unused code was found.
    pub fn mark_recovery_code_used(&self, id: &str, plaintext_code: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare("SELECT rowid, code FROM recovery_codes WHERE id = ?1 AND used = 0")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(map_sqlite_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(map_sqlite_err)?;
        drop(stmt);

        for (rowid, hash) in rows {
            if verify_password(&hash, plaintext_code) {
                conn.execute(
                    "UPDATE recovery_codes SET used = 1 WHERE rowid = ?1",
                    params![rowid],
                )
                .map_err(map_sqlite_err)?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::hash_password;

    #[test]
    fn create_and_fetch_account() {
        let store = Store::open_in_memory().unwrap();
        let account = Account {
            id: "alice".into(),
            password_hash: hash_password("pw12345").unwrap(),
            otp_secret: String::new(),
            use_otp: true,
        };
        store.create_account(&account).unwrap();

        let fetched = store.get_account_by_id("alice").unwrap();
        assert_eq!(fetched.id, "alice");
        assert!(fetched.use_otp);
    }

    #[test]
    fn duplicate_account_id_is_unique_violation() {
        let store = Store::open_in_memory().unwrap();
        let account = Account {
            id: "alice".into(),
            password_hash: "x".into(),
            otp_secret: String::new(),
            use_otp: false,
        };
        store.create_account(&account).unwrap();
        assert!(matches!(store.create_account(&account), Err(NvrError::StoreUnique(_))));
    }

    #[test]
    fn recovery_code_single_use() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_account(&Account {
                id: "alice".into(),
                password_hash: "x".into(),
                otp_secret: String::new(),
                use_otp: true,
            })
            .unwrap();

        let hash = hash_password("AB12CD34EF").unwrap();
        store.store_hashed_recovery_codes("alice", &[hash]).unwrap();

        assert!(store.mark_recovery_code_used("alice", "AB12CD34EF").unwrap());
        assert!(!store.mark_recovery_code_used("alice", "AB12CD34EF").unwrap());
    }

    #[test]
    fn unused_hashes_excludes_consumed_codes() {
        let store = Store::open_in_memory().unwrap();
        store
            .create_account(&Account {
                id: "alice".into(),
                password_hash: "x".into(),
                otp_secret: String::new(),
                use_otp: true,
            })
            .unwrap();
        let hashes: Vec<String> = ["AAAAAAAAAA", "BBBBBBBBBB"]
            .iter()
            .map(|c| hash_password(c).unwrap())
            .collect();
        store.store_hashed_recovery_codes("alice", &hashes).unwrap();
        assert_eq!(store.list_unused_recovery_hashes("alice").unwrap().len(), 2);

        store.mark_recovery_code_used("alice", "AAAAAAAAAA").unwrap();
        assert_eq!(store.list_unused_recovery_hashes("alice").unwrap().len(), 1);
    }
}
