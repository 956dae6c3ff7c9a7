//! Context fingerprints

use matrix_fs::checksum::compute_parts_checksum;

use crate::deps::DependencySet;

/// Fingerprint of a context: backend, declared interpreter and canonical
/// dependency set, as `sha256:<hex>`.
///
/// Any change to one of the inputs yields a different fingerprint.
pub fn fingerprint(backend: &str, interpreter: &str, deps: &DependencySet) -> String {
    let header = [
        format!("backend={backend}"),
        format!("interpreter={}", interpreter.trim()),
    ];
    compute_parts_checksum(header.into_iter().chain(deps.lines()))
}
