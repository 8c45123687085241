//! Ownership back-references between entities and their child resources
//!
//! Every child carries exactly one controller reference to the entity it was
//! compiled from. The API server's garbage collector uses it to cascade
//! deletion, and the diff engine uses it to tell our children apart from
//! foreign objects that happen to share a name.
//!
//! References are matched on apiVersion, kind and name. A matching reference
//! with a different uid is stale (the entity was deleted and recreated under
//! the same name) and is replaced in place. References to other owners are
//! never removed.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::Error;

/// Build the controller owner reference pointing at `owner`
///
/// Fails if the owner has not been persisted yet (no uid).
pub fn controller_owner_ref<K>(owner: &K) -> Result<OwnerReference, Error>
where
    K: Resource<DynamicType = ()>,
{
    let uid = owner.uid().ok_or_else(|| {
        Error::internal_with_context(
            "ownership",
            format!("{} {} has no uid", K::kind(&()), owner.name_any()),
        )
    })?;

    Ok(OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: owner.name_any(),
        uid,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Result of comparing a child's owner references against the expected one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerCheck {
    /// The expected reference is present
    Correct,
    /// A reference to the same owner exists but with the wrong uid
    Stale(usize),
    /// No reference to the owner exists
    Missing,
}

fn refers_to_same_owner(candidate: &OwnerReference, expected: &OwnerReference) -> bool {
    candidate.api_version == expected.api_version
        && candidate.kind == expected.kind
        && candidate.name == expected.name
}

/// Inspect `meta` for the expected owner reference
pub fn check_owner(meta: &ObjectMeta, expected: &OwnerReference) -> OwnerCheck {
    let refs = meta.owner_references.as_deref().unwrap_or_default();
    match refs.iter().position(|r| refers_to_same_owner(r, expected)) {
        Some(idx) if refs[idx].uid == expected.uid => OwnerCheck::Correct,
        Some(idx) => OwnerCheck::Stale(idx),
        None => OwnerCheck::Missing,
    }
}

/// Make `meta` carry the expected owner reference
///
/// Returns true if `meta` was changed. Foreign references are left alone.
pub fn ensure_owner(meta: &mut ObjectMeta, expected: &OwnerReference) -> bool {
    match check_owner(meta, expected) {
        OwnerCheck::Correct => false,
        OwnerCheck::Stale(idx) => {
            if let Some(refs) = meta.owner_references.as_mut() {
                refs[idx] = expected.clone();
            }
            true
        }
        OwnerCheck::Missing => {
            meta.owner_references
                .get_or_insert_with(Vec::new)
                .push(expected.clone());
            true
        }
    }
}
