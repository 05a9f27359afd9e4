use crate::schema::decoded::{Decoded, Hex};
use crate::schema::key::Key;
use std::collections::HashMap;

/// Iterates over the keys a role authorizes, resolving each key ID through the
/// enclosing key map. IDs without a map entry are skipped; the verifier reports those
/// separately.
pub(crate) struct KeysIter<'a> {
    pub(crate) keyids_iter: std::slice::Iter<'a, Decoded<Hex>>,
    pub(crate) keys: &'a HashMap<Decoded<Hex>, Key>,
}

impl<'a> Iterator for KeysIter<'a> {
    type Item = (&'a Decoded<Hex>, &'a Key);

    fn next(&mut self) -> Option<Self::Item> {
        for keyid in &mut self.keyids_iter {
            if let Some(key) = self.keys.get(keyid) {
                return Some((keyid, key));
            }
        }
        None
    }
}
