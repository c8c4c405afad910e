use std::{io, path::Path};

use tracing::{debug, instrument};

use crate::models::OwnershipPair;

/// Queries the filesystem owner of a path.
pub trait OwnershipQuery: Send + Sync {
    fn query_ownership(&self, path: &Path) -> io::Result<OwnershipPair>;
}

/// Reads ownership from filesystem metadata. Symlinks are not followed.
#[derive(Copy, Clone, Debug, Default)]
pub struct FsOwnershipQuery;

impl OwnershipQuery for FsOwnershipQuery {
    fn query_ownership(&self, path: &Path) -> io::Result<OwnershipPair> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let md = fs_err::symlink_metadata(path)?;
            Ok(OwnershipPair { uid: md.uid(), gid: md.gid() })
        }
        #[cfg(not(unix))]
        {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("ownership query not supported on this platform: {}", path.display()),
            ))
        }
    }
}

/// Returns the owner of `path`, or `(fallback_uid, fallback_uid)` if it cannot be queried.
///
/// `fallback_uid` is the caller's acting user; it doubles as the group id on fallback.
#[instrument(level = "trace", skip(query), fields(path = %path.display()))]
pub fn resolve_ownership(
    query: &dyn OwnershipQuery,
    path: &Path,
    fallback_uid: u32,
) -> OwnershipPair {
    match query.query_ownership(path) {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, fallback_uid, "Ownership query failed, using fallback uid");
            OwnershipPair::fallback(fallback_uid)
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    struct FailingQuery(io::ErrorKind);

    impl OwnershipQuery for FailingQuery {
        fn query_ownership(&self, _path: &Path) -> io::Result<OwnershipPair> {
            Err(io::Error::from(self.0))
        }
    }

    struct FixedQuery(OwnershipPair);

    impl OwnershipQuery for FixedQuery {
        fn query_ownership(&self, _path: &Path) -> io::Result<OwnershipPair> {
            Ok(self.0)
        }
    }

    #[test]
    fn query_failure_falls_back_to_uid_for_both_ids() {
        use io::ErrorKind::*;

        for kind in [PermissionDenied, NotFound, Unsupported] {
            let pair = resolve_ownership(&FailingQuery(kind), Path::new("/data/x"), 10_123);
            assert_eq!(pair, OwnershipPair { uid: 10_123, gid: 10_123 });
        }
    }

    #[test]
    fn successful_query_is_returned_as_is() {
        let expected = OwnershipPair { uid: 1000, gid: 2000 };
        let pair = resolve_ownership(&FixedQuery(expected), Path::new("/data/x"), 0);
        assert_eq!(pair, expected);
    }

    #[test]
    fn missing_path_falls_back() {
        let dir = tempdir().unwrap();
        let pair = resolve_ownership(&FsOwnershipQuery, &dir.path().join("gone"), 42);
        assert_eq!(pair, OwnershipPair::fallback(42));
    }

    #[cfg(unix)]
    #[test]
    fn fs_query_reads_real_owner() {
        use std::os::unix::fs::MetadataExt;

        let dir = tempdir().unwrap();
        let md = std::fs::metadata(dir.path()).unwrap();
        let pair = resolve_ownership(&FsOwnershipQuery, dir.path(), u32::MAX);
        assert_eq!(pair, OwnershipPair { uid: md.uid(), gid: md.gid() });
    }
}
