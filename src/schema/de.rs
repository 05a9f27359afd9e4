use crate::schema::decoded::{Decoded, Hex};
use crate::schema::error;
use crate::schema::key::Key;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// Deserializes a key map, recomputing every key ID from the key contents it names.
///
/// An entry whose ID does not match its key is rejected, as are two entries whose IDs
/// decode to the same bytes (for hex, two spellings of one ID).
pub(super) fn deserialize_keys<'de, D>(
    deserializer: D,
) -> Result<HashMap<Decoded<Hex>, Key>, D::Error>
where
    D: Deserializer<'de>,
{
    let declared = HashMap::<String, Key>::deserialize(deserializer)?;
    let mut keys = HashMap::with_capacity(declared.len());
    for (declared_id, key) in declared {
        let keyid = Decoded::<Hex>::parse(&declared_id).map_err(D::Error::custom)?;
        let calculated = key.key_id().map_err(D::Error::custom)?;
        if keyid != calculated {
            return error::InvalidKeyId {
                keyid: declared_id,
                calculated: calculated.to_string(),
            }
            .fail()
            .map_err(D::Error::custom);
        }
        if keys.insert(keyid, key).is_some() {
            return error::DuplicateKeyId { keyid: declared_id }
                .fail()
                .map_err(D::Error::custom);
        }
    }
    Ok(keys)
}

/// Deserializes the flattened leftovers of a tagged role struct, dropping the `_type`
/// discriminator so it is not duplicated when the struct is serialized again.
pub(super) fn extra_skip_type<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let mut map = HashMap::deserialize(deserializer)?;
    map.remove("_type");
    Ok(map)
}
