//! JSON-file-backed user repository.
//!
//! The whole collection lives in one pretty-printed JSON array. Every
//! operation re-reads the file; nothing is cached between calls. Mutations
//! run load-modify-save under a single writer lock and replace the file by
//! renaming a fully written temporary sibling over it.
//!
//! Stores written before passwords were hashed keep `senha` in plaintext.
//! Those users can still log in, and every write replaces any plaintext
//! left in the collection with a digest.

use super::model::{normalize_role, NewUser, User, UserPatch};
use crate::auth::password::{is_digest, matches_plaintext};
use crate::auth::PasswordHasher;
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Failures talking to the backing file. "Not found" is not an error here:
/// lookups return `Ok(None)` and mutations return `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access user store at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("user store at {} is not a valid user list: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode user list: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("email '{0}' is already registered")]
    Conflict(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("user store task did not complete: {0}")]
    Task(String),
}

pub struct UserRepository {
    path: PathBuf,
    hasher: PasswordHasher,
    write_lock: Mutex<()>,
}

impl UserRepository {
    pub fn new(path: impl Into<PathBuf>, hasher: PasswordHasher) -> Self {
        Self {
            path: path.into(),
            hasher,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole collection. A missing or empty file is an empty list.
    pub fn load(&self) -> Result<Vec<User>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the whole collection.
    pub fn save(&self, users: &[User]) -> Result<(), StoreError> {
        let mut users = users.to_vec();
        let _guard = self.write_lock.lock();
        self.write_all(&mut users)
    }

    /// Append a fully formed user. Rejects an email that is already taken.
    pub fn add(&self, user: User) -> Result<User, StoreError> {
        let _guard = self.write_lock.lock();
        let mut users = self.load()?;

        if users.iter().any(|u| same_email(&u.email, &user.email)) {
            return Err(StoreError::Conflict(user.email));
        }

        users.push(user.clone());
        self.write_all(&mut users)?;
        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Hash the password, mint an id and persist a new user.
    pub fn register(&self, new_user: NewUser) -> Result<User, StoreError> {
        let digest = self
            .hasher
            .hash(&new_user.senha)
            .map_err(|e| StoreError::Hash(e.to_string()))?;
        self.add(new_user.into_user(digest))
    }

    /// Find a user by email and check the password.
    /// Returns `None` for an unknown email or a wrong password alike.
    pub fn authenticate(&self, email: &str, senha: &str) -> Result<Option<User>, StoreError> {
        let Some(user) = self.find_by_email(email)? else {
            // Keep the unknown-email path as slow as the wrong-password one
            let _ = self.hasher.hash(senha);
            return Ok(None);
        };

        if is_digest(&user.senha) {
            return Ok(self.hasher.verify(senha, &user.senha).then_some(user));
        }

        if user.senha.is_empty() || !matches_plaintext(senha, &user.senha) {
            let _ = self.hasher.hash(senha);
            return Ok(None);
        }

        self.migrate_plaintext_passwords()?;
        Ok(Some(self.find_by_id(&user.id)?.unwrap_or(user)))
    }

    /// Hash every plaintext `senha` left in the store and rewrite it.
    /// Returns how many passwords were sealed; the file is untouched when
    /// there were none.
    pub fn migrate_plaintext_passwords(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let mut users = self.load()?;
        let sealed = self.seal_plaintext_passwords(&mut users)?;
        if sealed > 0 {
            self.write_users(&users)?;
        }
        Ok(sealed)
    }

    /// Remove the user with the given id. Returns whether one was removed;
    /// the file is only rewritten when something changed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut users = self.load()?;
        let before = users.len();
        users.retain(|u| u.id != id);

        if users.len() == before {
            return Ok(false);
        }

        self.write_all(&mut users)?;
        tracing::info!(user_id = id, "User deleted");
        Ok(true)
    }

    /// Overwrite the fields present in `patch` on the user with the given
    /// id. Values are trimmed as at registration. Returns whether the user
    /// exists; an empty patch never rewrites the file.
    pub fn update(&self, id: &str, patch: UserPatch) -> Result<bool, StoreError> {
        if patch.is_empty() {
            return Ok(self.find_by_id(id)?.is_some());
        }

        let senha_digest = patch
            .senha
            .as_deref()
            .map(|senha| self.hasher.hash(senha))
            .transpose()
            .map_err(|e| StoreError::Hash(e.to_string()))?;

        let _guard = self.write_lock.lock();
        let mut users = self.load()?;

        let Some(pos) = users.iter().position(|u| u.id == id) else {
            return Ok(false);
        };

        let email = patch.email.as_deref().map(str::trim);
        if let Some(email) = email {
            let taken = users
                .iter()
                .any(|u| u.id != id && same_email(&u.email, email));
            if taken {
                return Err(StoreError::Conflict(email.to_owned()));
            }
        }

        let user = &mut users[pos];
        if let Some(nome) = patch.nome {
            user.nome = nome.trim().to_owned();
        }
        if let Some(email) = email {
            user.email = email.to_owned();
        }
        if let Some(cpf) = patch.cpf {
            user.cpf = cpf.trim().to_owned();
        }
        if let Some(digest) = senha_digest {
            user.senha = digest;
        }
        if let Some(idade) = patch.idade {
            user.idade = idade.trim().to_owned();
        }
        if let Some(perfil) = patch.perfil {
            user.perfil = normalize_role(&perfil);
        }

        self.write_all(&mut users)?;
        tracing::info!(user_id = id, "User updated");
        Ok(true)
    }

    /// First user whose email matches (trimmed, case-insensitive).
    pub fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .load()?
            .into_iter()
            .find(|u| same_email(&u.email, email)))
    }

    pub fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.load()?.into_iter().find(|u| u.id == id))
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.load()?.len())
    }

    /// Replace plaintext passwords with digests in place.
    fn seal_plaintext_passwords(&self, users: &mut [User]) -> Result<usize, StoreError> {
        let mut sealed = 0;
        for user in users
            .iter_mut()
            .filter(|u| !u.senha.is_empty() && !is_digest(&u.senha))
        {
            user.senha = self
                .hasher
                .hash(&user.senha)
                .map_err(|e| StoreError::Hash(e.to_string()))?;
            tracing::warn!(user_id = %user.id, "Hashed plaintext password left by an older store");
            sealed += 1;
        }
        Ok(sealed)
    }

    /// Seal plaintext passwords, then write. Caller must hold `write_lock`.
    fn write_all(&self, users: &mut [User]) -> Result<(), StoreError> {
        self.seal_plaintext_passwords(users)?;
        self.write_users(users)
    }

    /// Caller must hold `write_lock`.
    fn write_users(&self, users: &[User]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        users.serialize(&mut ser).map_err(StoreError::Encode)?;
        buf.push(b'\n');

        let io_err = |source: io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&buf).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn same_email(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
