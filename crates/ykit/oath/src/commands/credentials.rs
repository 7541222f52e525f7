use bytes::Bytes;

use super::{Body, oath_command};
use crate::constants::{PROPERTY_REQUIRE_TOUCH, ins, tags};
use crate::credential::{CredentialTemplate, OathType};
use crate::error::Result;

oath_command! {
    /// LIST: every stored credential as `0x72` records
    List => ins::LIST
}

impl List {
    /// List all credentials
    pub fn new() -> Self {
        Self::raw(0x00, 0x00, Bytes::new())
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

oath_command! {
    /// PUT: store a credential, replacing one with the same id
    Put => ins::PUT
}

impl Put {
    /// Store `template`, validating it first
    pub fn new(template: &CredentialTemplate, requires_touch: bool) -> Result<Self> {
        template.validate()?;
        let key = template.key_material();
        let mut key_record = Vec::with_capacity(2 + key.len());
        key_record.push(template.oath_type.code() | template.algorithm.code());
        key_record.push(template.digits);
        key_record.extend_from_slice(&key);

        let mut body = Body::default()
            .tlv(tags::NAME, template.id().as_bytes())?
            .tlv(tags::KEY, &key_record)?;
        key_record.fill(0);
        if requires_touch {
            body = body.raw(&[tags::PROPERTY as u8, PROPERTY_REQUIRE_TOUCH]);
        }
        if template.oath_type == OathType::Hotp && template.counter > 0 {
            body = body.tlv(tags::IMF, &template.counter.to_be_bytes())?;
        }
        Ok(Self::raw(0x00, 0x00, body.finish()))
    }
}

oath_command! {
    /// DELETE: remove a credential by id
    Delete => ins::DELETE
}

impl Delete {
    /// Delete `id`
    pub fn new(id: &str) -> Result<Self> {
        Ok(Self::raw(0x00, 0x00, Body::default().tlv(tags::NAME, id.as_bytes())?.finish()))
    }
}

oath_command! {
    /// RENAME: change a credential id (firmware 5.3.1 and later)
    Rename => ins::RENAME
}

impl Rename {
    /// Rename `from` to `to`
    pub fn new(from: &str, to: &str) -> Result<Self> {
        let data = Body::default()
            .tlv(tags::NAME, from.as_bytes())?
            .tlv(tags::NAME, to.as_bytes())?
            .finish();
        Ok(Self::raw(0x00, 0x00, data))
    }
}
