use serde::{Deserialize, Deserializer, Serialize};

/// Role granted access to user listing, deletion and update.
pub const ADMIN_ROLE: &str = "admin";

/// Role assigned when a registration form leaves `perfil` blank.
pub const DEFAULT_ROLE: &str = "usuario";

/// A registered user, as persisted in the JSON store.
///
/// `senha` holds a PHC password digest. Plaintext left by stores that
/// predate hashing is replaced with a digest the next time the file is
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub nome: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub cpf: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub senha: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub idade: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub perfil: String,
}

/// Registration input. `senha` is plaintext here and is hashed before a
/// [`User`] is built from it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub nome: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub cpf: String,
    #[serde(default)]
    pub senha: String,
    #[serde(default)]
    pub idade: String,
    #[serde(default)]
    pub perfil: String,
}

impl NewUser {
    /// Build the record to persist: mint an id and store the digest in
    /// place of the plaintext password. A blank role becomes [`DEFAULT_ROLE`].
    pub fn into_user(self, senha_digest: String) -> User {
        let perfil = normalize_role(&self.perfil);
        User {
            id: uuid::Uuid::new_v4().to_string(),
            nome: self.nome.trim().to_owned(),
            email: self.email.trim().to_owned(),
            cpf: self.cpf.trim().to_owned(),
            senha: senha_digest,
            idade: self.idade.trim().to_owned(),
            perfil,
        }
    }
}

/// Fields an update may change. `id` is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPatch {
    pub nome: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    /// Plaintext; hashed by the repository before it is stored.
    pub senha: Option<String>,
    pub idade: Option<String>,
    pub perfil: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether applying this patch changes who the user is allowed to act as.
    pub fn touches_credentials(&self) -> bool {
        self.senha.is_some() || self.perfil.is_some()
    }
}

/// Body of `PUT /usuarios/`: the target id plus the allow-listed fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    pub id: String,
    pub nome: Option<String>,
    pub email: Option<String>,
    pub cpf: Option<String>,
    pub senha: Option<String>,
    pub idade: Option<String>,
    pub perfil: Option<String>,
}

impl UserUpdate {
    pub fn into_parts(self) -> (String, UserPatch) {
        (
            self.id,
            UserPatch {
                nome: self.nome,
                email: self.email,
                cpf: self.cpf,
                senha: self.senha,
                idade: self.idade,
                perfil: self.perfil,
            },
        )
    }
}

/// Trimmed role, with a blank one replaced by [`DEFAULT_ROLE`].
pub(crate) fn normalize_role(perfil: &str) -> String {
    match perfil.trim() {
        "" => DEFAULT_ROLE.to_owned(),
        perfil => perfil.to_owned(),
    }
}

/// Records written by older releases carry `null` for fields a form left out.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
