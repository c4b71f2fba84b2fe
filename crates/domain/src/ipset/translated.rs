use serde::{Deserialize, Serialize};

use super::taxonomy::{SetMetadata, SetType};

/// Declarative set produced by the policy translation engine.
///
/// Only two types legitimately arrive with literal members: `CIDRBlocks`
/// (leaf IP ranges) and `NestedLabelOfPod` (member set names derived from
/// multi-value label match expressions). Everything else arrives with an
/// empty member list.
///
/// Caveat: a list-kind translated set carrying policy-scoped members must
/// use a name unique to the originating policy. Sets are keyed
/// process-wide by hashed name, so a name reused across two policies
/// would let one policy's removal strip members the other still needs —
/// cross-policy membership corruption, not a performance bug. Guaranteeing
/// uniqueness is the translation engine's contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedSet {
    pub metadata: SetMetadata,
    /// Member set names for `NestedLabelOfPod`, IP address ranges for
    /// `CIDRBlocks`.
    pub members: Vec<String>,
}

impl TranslatedSet {
    pub fn new(
        name: impl Into<String>,
        set_type: SetType,
        members: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            metadata: SetMetadata::new(name, set_type),
            members: members.into_iter().collect(),
        }
    }
}

/// Metadata for the members of a nested-label translated set. The
/// translation engine emits every member as a key-value pod label set;
/// a future engine emitting other member types surfaces here as a new
/// [`SetType`] variant rather than a runtime surprise.
pub fn members_as_metadata(member_names: &[String]) -> Vec<SetMetadata> {
    member_names
        .iter()
        .map(|name| SetMetadata::new(name.clone(), SetType::KeyValueLabelOfPod))
        .collect()
}
