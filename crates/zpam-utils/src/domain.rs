//! Address/domain helpers shared by the auth validator (C3) and the
//! feature scorers (C5) — both need to pull the registrable domain out
//! of header and envelope addresses the same way.

/// Extracts the domain from an address of the form `local@domain` or a
/// bare domain. Does not perform PSL (public-suffix) reduction — the
/// spec's DMARC alignment check is an exact-suffix match on the full
/// domain, not the organizational domain.
pub fn domain_of(address: &str) -> &str {
    let address = address.trim().trim_start_matches('<').trim_end_matches('>');
    address.rsplit('@').next().unwrap_or(address)
}

/// True if `candidate` equals `base` or is a subdomain of `base`
/// (exact suffix match per spec §4.3's DMARC alignment rule).
pub fn domain_aligns(candidate: &str, base: &str) -> bool {
    let candidate = candidate.trim_end_matches('.').to_ascii_lowercase();
    let base = base.trim_end_matches('.').to_ascii_lowercase();
    candidate == base || candidate.ends_with(&format!(".{base}"))
}
