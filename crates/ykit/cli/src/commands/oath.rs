use anyhow::Context as _;
use clap::{Subcommand, ValueEnum};
use ykit_oath::{CredentialTemplate, HashAlgorithm, OathSession, OathType, otp};

use crate::utils::{PasswordArgs, find_credential, parse_secret, session::KeyConnection};

/// Hash function choices for new credentials
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub(crate) enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl From<Algorithm> for HashAlgorithm {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Sha1 => Self::Sha1,
            Algorithm::Sha256 => Self::Sha256,
            Algorithm::Sha512 => Self::Sha512,
        }
    }
}

/// OATH subcommands
#[derive(Subcommand, Debug)]
pub(crate) enum OathCommand {
    /// Show applet version and lock state
    Info,

    /// List stored credentials
    List {
        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Calculate codes, for every credential or the one matching QUERY
    Code {
        /// Part of a credential name
        query: Option<String>,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Store a new credential
    Add {
        /// Account name
        account: String,

        /// Secret, hex encoded
        secret: String,

        /// Issuer
        #[arg(short, long)]
        issuer: Option<String>,

        /// Counter based (HOTP) instead of time based (TOTP)
        #[arg(long)]
        hotp: bool,

        /// Hash function
        #[arg(short, long, value_enum, default_value_t)]
        algorithm: Algorithm,

        /// Code length
        #[arg(short, long, default_value_t = 6)]
        digits: u8,

        /// TOTP period in seconds
        #[arg(long, default_value_t = 30)]
        period: u32,

        /// Initial HOTP counter
        #[arg(long, default_value_t = 0)]
        counter: u32,

        /// Require a touch for every code
        #[arg(short, long)]
        touch: bool,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Delete the credential matching QUERY
    Delete {
        /// Part of a credential name
        query: String,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Rename the credential matching QUERY
    Rename {
        /// Part of a credential name
        query: String,

        /// New account name
        account: String,

        /// New issuer
        #[arg(short, long)]
        issuer: Option<String>,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Set the applet password; an empty NEW_PASSWORD removes it
    SetPassword {
        /// New password
        new_password: String,

        #[command(flatten)]
        password: PasswordArgs,
    },

    /// Delete every credential and the password
    Reset,
}

impl OathCommand {
    pub(crate) fn run(self, key: &KeyConnection) -> anyhow::Result<()> {
        let session = OathSession::open(key.context()).wait().context("opening the OATH applet")?;
        match self {
            Self::Info => {
                println!("OATH version: {}", session.version());
                let protected = if session.has_password() { "yes" } else { "no" };
                println!("Password protected: {protected}");
            }
            Self::List { password } => {
                password.unlock(&session)?;
                let credentials = session.list().wait()?;
                if credentials.is_empty() {
                    println!("No credentials stored");
                }
                for credential in credentials {
                    let touch = if credential.requires_touch { ", touch" } else { "" };
                    println!(
                        "{credential} [{} {}{touch}]",
                        credential.oath_type, credential.algorithm
                    );
                }
            }
            Self::Code { query, password } => {
                password.unlock(&session)?;
                code(&session, query.as_deref())?;
            }
            Self::Add {
                account,
                secret,
                issuer,
                hotp,
                algorithm,
                digits,
                period,
                counter,
                touch,
                password,
            } => {
                password.unlock(&session)?;
                let secret = parse_secret(&secret)?;
                let template = if hotp {
                    CredentialTemplate::hotp(algorithm.into(), secret, issuer.as_deref(), &account)
                        .with_counter(counter)
                } else {
                    CredentialTemplate::totp(algorithm.into(), secret, issuer.as_deref(), &account)
                        .with_period(period)
                }
                .with_digits(digits);
                let credential = session.put(&template, touch).wait()?;
                println!("Stored {credential}");
            }
            Self::Delete { query, password } => {
                password.unlock(&session)?;
                let credential = find_credential(&session, &query)?;
                let name = credential.to_string();
                session.delete(credential).wait()?;
                println!("Deleted {name}");
            }
            Self::Rename {
                query,
                account,
                issuer,
                password,
            } => {
                password.unlock(&session)?;
                let credential = find_credential(&session, &query)?;
                let renamed = session.rename(credential, issuer.as_deref(), &account).wait()?;
                println!("Renamed to {renamed}");
            }
            Self::SetPassword {
                new_password,
                password,
            } => {
                password.unlock(&session)?;
                session.set_password(&new_password).wait()?;
                if new_password.is_empty() {
                    println!("Password removed");
                } else {
                    println!("Password set");
                }
            }
            Self::Reset => {
                session.reset().wait()?;
                println!("OATH applet reset; all credentials deleted");
            }
        }
        Ok(())
    }
}

fn code(session: &OathSession, query: Option<&str>) -> anyhow::Result<()> {
    let now = otp::unix_now();
    if let Some(query) = query {
        let credential = find_credential(session, query)?;
        if credential.requires_touch {
            eprintln!("Touch the key...");
        }
        let code = session.calculate(credential.clone(), now).wait()?;
        println!("{credential}: {}", describe(&code, now));
        return Ok(());
    }

    for entry in session.calculate_all(now).wait()? {
        let shown = match (&entry.code, entry.credential.oath_type) {
            (Some(code), _) => describe(code, now),
            (None, OathType::Hotp) => "[HOTP, pass the name to calculate]".to_owned(),
            (None, OathType::Totp) => "[requires touch]".to_owned(),
        };
        println!("{}: {shown}", entry.credential);
    }
    Ok(())
}

fn describe(code: &ykit_oath::Code, now: u64) -> String {
    match code.valid_until {
        Some(until) => format!("{code} (expires in {}s)", until.saturating_sub(now)),
        None => code.to_string(),
    }
}
