//! Helpers shared by the command handlers

pub(crate) mod reader;
pub(crate) mod session;

use anyhow::{Context as _, bail};
use clap::Args;
use ykit_oath::{Credential, OathSession};

/// Password for a protected OATH applet
#[derive(Args, Debug, Clone)]
pub(crate) struct PasswordArgs {
    /// Applet password, needed when the applet is password protected
    #[arg(short, long)]
    pub(crate) password: Option<String>,
}

impl PasswordArgs {
    /// Unlock `session` if it is locked
    pub(crate) fn unlock(&self, session: &OathSession) -> anyhow::Result<()> {
        if !session.is_locked() {
            return Ok(());
        }
        let Some(password) = &self.password else {
            bail!("the OATH applet is password protected; pass --password");
        };
        session.unlock(password).wait().context("unlocking the OATH applet")?;
        Ok(())
    }
}

/// Credential whose display name or id contains `query`, case-insensitively
///
/// Fails unless exactly one credential matches, except when one matches the
/// id exactly.
pub(crate) fn find_credential(session: &OathSession, query: &str) -> anyhow::Result<Credential> {
    let credentials = session.list().wait()?;
    if let Some(exact) = credentials.iter().find(|c| c.id() == query) {
        return Ok(exact.clone());
    }
    let needle = query.to_lowercase();
    let matches_needle = |c: &Credential| {
        c.id().to_lowercase().contains(&needle) || c.to_string().to_lowercase().contains(&needle)
    };
    let mut matches = credentials.into_iter().filter(|c| matches_needle(c));
    match (matches.next(), matches.next()) {
        (Some(credential), None) => Ok(credential),
        (None, _) => bail!("no credential matches {query:?}"),
        (Some(_), Some(_)) => bail!("more than one credential matches {query:?}"),
    }
}

/// Decode a secret given as hex, ignoring spaces
pub(crate) fn parse_secret(secret: &str) -> anyhow::Result<Vec<u8>> {
    let compact: String = secret.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(compact).context("secret must be hex encoded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secret_ignores_spaces() {
        assert_eq!(parse_secret("3132 3334").unwrap(), b"1234");
        assert!(parse_secret("zz").is_err());
    }
}
