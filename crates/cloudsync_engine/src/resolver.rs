//! Conflict resolution policies.

use crate::error::SyncResult;
use crate::mapper::DocumentMapper;
use cloudsync_protocol::Conflict;

/// Decides how a conflict between a local and a remote change is resolved.
///
/// The synchronizer calls the resolver once for every entity that both the
/// device and the remote changed since the last sync, even when both changes
/// are identical ([`Conflict::has_differences`] is there for policies that
/// want to short-circuit those).
///
/// A resolver must call exactly one of [`Conflict::resolve_keep_local`],
/// [`Conflict::resolve_keep_remote`] or [`Conflict::resolve_merged`].
/// Returning without a decision aborts the sync cycle with
/// `ConflictNotResolved`, as does returning an error.
///
/// Closures work as resolvers:
///
/// ```ignore
/// let resolver = |conflict: &mut Conflict, _: &DocumentMapper| -> SyncResult<()> {
///     conflict.resolve_keep_remote();
///     Ok(())
/// };
/// ```
pub trait ConflictResolver: Send + Sync {
    /// Resolves one conflict in place.
    fn resolve(&self, conflict: &mut Conflict, mapper: &DocumentMapper) -> SyncResult<()>;
}

impl<F> ConflictResolver for F
where
    F: Fn(&mut Conflict, &DocumentMapper) -> SyncResult<()> + Send + Sync,
{
    fn resolve(&self, conflict: &mut Conflict, mapper: &DocumentMapper) -> SyncResult<()> {
        self(conflict, mapper)
    }
}

/// The device's change always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepLocalResolver;

impl ConflictResolver for KeepLocalResolver {
    fn resolve(&self, conflict: &mut Conflict, _mapper: &DocumentMapper) -> SyncResult<()> {
        conflict.resolve_keep_local();
        Ok(())
    }
}

/// The remote change always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepRemoteResolver;

impl ConflictResolver for KeepRemoteResolver {
    fn resolve(&self, conflict: &mut Conflict, _mapper: &DocumentMapper) -> SyncResult<()> {
        conflict.resolve_keep_remote();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudsync_protocol::{ConflictResolution, Document, EntityChange, EntityId, ID_FIELD};

    fn conflict() -> Conflict {
        let id = EntityId::new("Coll", 1).unwrap();
        Conflict::new(
            EntityChange::upsert(id.clone(), Document::new().with(ID_FIELD, 1).with("v", "a")),
            EntityChange::upsert(id, Document::new().with(ID_FIELD, 1).with("v", "b")),
        )
        .unwrap()
    }

    #[test]
    fn built_in_resolvers() {
        let mapper = DocumentMapper::new();

        let mut c = conflict();
        KeepLocalResolver.resolve(&mut c, &mapper).unwrap();
        assert_eq!(c.resolution(), &ConflictResolution::KeepLocal);

        let mut c = conflict();
        KeepRemoteResolver.resolve(&mut c, &mapper).unwrap();
        assert_eq!(c.resolution(), &ConflictResolution::KeepRemote);
    }

    #[test]
    fn closures_are_resolvers() {
        let merged = Document::new().with(ID_FIELD, 1).with("v", "ab");
        let expected = merged.clone();
        let resolver = move |conflict: &mut Conflict, _: &DocumentMapper| -> SyncResult<()> {
            conflict.resolve_merged(merged.clone())?;
            Ok(())
        };

        let mut c = conflict();
        resolver.resolve(&mut c, &DocumentMapper::new()).unwrap();
        assert_eq!(c.resolution(), &ConflictResolution::Merge(expected));
    }

    #[test]
    fn resolver_errors_propagate() {
        let resolver = |conflict: &mut Conflict, _: &DocumentMapper| -> SyncResult<()> {
            conflict.resolve_merged(Document::new().with(ID_FIELD, 2))?;
            Ok(())
        };

        let mut c = conflict();
        assert!(resolver.resolve(&mut c, &DocumentMapper::new()).is_err());
        assert!(!c.is_resolved());
    }
}
