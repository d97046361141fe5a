use crate::cluster::{ClusterApi, ResourceItem, ResourceKind};
use tracing::debug;

/// Key holding the passphrase inside the certificate's own Secret
pub const PASSWORD_KEY: &str = "password";

const SIBLING_SUFFIX: &str = "-password";
const KEY_SUFFIX: &str = ".password";

/// `tls.crt` -> `tls`, `bundle` -> `bundle`
#[must_use]
pub fn strip_extension(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

/// Name of the Secret that may hold passphrases for `resource_name`
#[must_use]
pub fn sibling_secret_name(resource_name: &str) -> String {
    format!("{resource_name}{SIBLING_SUFFIX}")
}

fn non_empty(bytes: Option<&[u8]>) -> Option<String> {
    bytes
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
        .filter(|password| !password.is_empty())
}

/// Looks up the passphrase for one data entry
///
/// Stages, first non-empty wins:
///
/// 1. `password` in the same Secret (Secrets only)
/// 2. `<entry without extension>.password` in `<resource>-password`
/// 3. `<entry>.password` in `<resource>-password`
///
/// Lookup failures fall through to the next stage and an empty string is a
/// valid outcome.
pub struct PasswordResolver<'a, C: ?Sized> {
    cluster: &'a C,
}

impl<'a, C> PasswordResolver<'a, C>
where
    C: ClusterApi + ?Sized,
{
    #[must_use]
    pub const fn new(cluster: &'a C) -> Self {
        Self { cluster }
    }

    pub async fn resolve(&self, item: &ResourceItem, entry_name: &str) -> String {
        if item.kind == ResourceKind::Secret {
            if let Some(password) = non_empty(item.entry(PASSWORD_KEY)) {
                return password;
            }
            debug!(
                secret = %item.name,
                namespace = %item.namespace,
                "Password not present within secret"
            );
        }

        let sibling_name = sibling_secret_name(&item.name);
        let sibling = match self.cluster.get_secret(&item.namespace, &sibling_name).await {
            Ok(sibling) => sibling,
            Err(e) => {
                debug!(
                    secret = %sibling_name,
                    namespace = %item.namespace,
                    "Password secret not available: {e:#}"
                );
                return String::new();
            }
        };

        let candidates = [
            format!("{}{KEY_SUFFIX}", strip_extension(entry_name)),
            format!("{entry_name}{KEY_SUFFIX}"),
        ];

        for key in &candidates {
            if let Some(password) = non_empty(sibling.entry(key)) {
                return password;
            }
        }

        debug!(
            secret = %sibling_name,
            namespace = %item.namespace,
            entry = %entry_name,
            "Password not present in password secret"
        );

        String::new()
    }
}
