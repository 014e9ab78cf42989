//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

/// The kinds of entity we hand out identifiers for. Each one gets its own hrp so an id
/// can't be mistaken for another kind of id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    User,
    Event,
    Transaction,
}

impl IdKind {
    pub fn hrp(&self) -> &'static str {
        match self {
            IdKind::User => "user_",
            IdKind::Event => "event_",
            IdKind::Transaction => "txn_",
        }
    }
}

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_id(kind: IdKind) -> anyhow::Result<String> {
    new_uuid_to_bech32(kind.hrp())
}

/// Checks that `id` decodes as bech32 and carries the hrp of `kind`
pub fn is_id_of(kind: IdKind, id: &str) -> bool {
    match bech32::decode(id) {
        Ok((hrp, data)) => hrp.as_str() == kind.hrp() && data.len() == 16,
        Err(_) => false,
    }
}
