//! Subcommands and their handlers

mod fido2;
mod oath;

pub(crate) use fido2::Fido2Command;
pub(crate) use oath::OathCommand;
