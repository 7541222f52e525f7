use std::thread;

use anyhow::Context as _;
use clap::Subcommand;
use ykit_fido2::{Fido2Config, Fido2Session, KeyState};

use crate::utils::session::KeyConnection;

/// FIDO2 subcommands
#[derive(Subcommand, Debug)]
pub(crate) enum Fido2Command {
    /// Show what the authenticator supports
    Info,

    /// Show how many PIN attempts are left
    Retries,

    /// Set the first PIN
    SetPin {
        /// New PIN, 4 to 63 bytes
        pin: String,
    },

    /// Change the PIN
    ChangePin {
        /// Current PIN
        current: String,

        /// New PIN, 4 to 63 bytes
        new: String,
    },

    /// Delete every FIDO2 credential and the PIN
    Reset,
}

impl Fido2Command {
    pub(crate) fn run(self, key: &KeyConnection) -> anyhow::Result<()> {
        let session = Fido2Session::open(key.context(), Fido2Config::new())
            .wait()
            .context("opening the FIDO2 application")?;
        match self {
            Self::Info => {
                let info = session.get_info().wait()?;
                println!("Versions: {}", info.versions.join(", "));
                if !info.extensions.is_empty() {
                    println!("Extensions: {}", info.extensions.join(", "));
                }
                println!("AAGUID: {}", hex::encode(&info.aaguid));
                for (name, value) in &info.options {
                    println!("Option {name}: {value}");
                }
                if let Some(size) = info.max_msg_size {
                    println!("Max message size: {size}");
                }
                let protocols: Vec<String> =
                    info.pin_protocols.iter().map(u64::to_string).collect();
                println!("PIN protocols: {}", protocols.join(", "));
            }
            Self::Retries => {
                let retries = session.get_pin_retries().wait()?;
                println!("PIN retries left: {retries}");
            }
            Self::SetPin { pin } => {
                session.set_pin(&pin).wait()?;
                println!("PIN set");
            }
            Self::ChangePin { current, new } => {
                session.change_pin(&current, &new).wait()?;
                println!("PIN changed");
            }
            Self::Reset => {
                prompt_on_touch(&session);
                session.reset().wait()?;
                println!("FIDO2 application reset");
            }
        }
        Ok(())
    }
}

/// Tell the user to touch the key whenever the session waits for it
fn prompt_on_touch(session: &Fido2Session) {
    let states = session.subscribe_key_state();
    // ends when the session drops its state
    let _ = thread::Builder::new().name("ykit-touch-prompt".into()).spawn(move || {
        for state in states.iter() {
            if state == KeyState::TouchKey {
                eprintln!("Touch the key...");
            }
        }
    });
}
