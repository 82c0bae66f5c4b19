// Client protocol version negotiation over semver ranges.

use semver::{Comparator, Op, Version, VersionReq};

/// Ranges this server can speak, most preferred first.
pub const SUPPORTED_VERSIONS: &[&str] = &["^0.4.0", "^0.3.0", "^0.2.0", "^0.1.0"];

/// Assumed offer for clients that predate version negotiation.
const DEFAULT_CLIENT_VERSION: &str = "^0.1.0";

pub fn supported_versions() -> Vec<String> {
    SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect()
}

/// Picks the first server-supported range that intersects any range the
/// client offered. An empty offer is treated as `^0.1.0`. Returns `None`
/// when no server range intersects the offer.
pub fn select_protocol_version(client_versions: &[String]) -> Option<String> {
    let default_offer = [DEFAULT_CLIENT_VERSION.to_string()];
    let offered: &[String] = if client_versions.is_empty() {
        &default_offer
    } else {
        client_versions
    };

    let client_reqs: Vec<VersionReq> = offered
        .iter()
        .filter_map(|range| VersionReq::parse(range).ok())
        .collect();

    for server_range in SUPPORTED_VERSIONS {
        let server_req =
            VersionReq::parse(server_range).expect("supported version ranges must be valid semver");
        if client_reqs
            .iter()
            .any(|client_req| ranges_intersect(&server_req, client_req))
        {
            return Some((*server_range).to_string());
        }
    }

    None
}

/// Ranges without `||` are convex intervals, so two of them intersect iff
/// the lower bound of one satisfies the other.
fn ranges_intersect(a: &VersionReq, b: &VersionReq) -> bool {
    a.matches(&lower_bound(b)) || b.matches(&lower_bound(a))
}

fn lower_bound(req: &VersionReq) -> Version {
    req.comparators
        .iter()
        .filter_map(comparator_lower_bound)
        .max()
        .unwrap_or_else(|| Version::new(0, 0, 0))
}

fn comparator_lower_bound(comparator: &Comparator) -> Option<Version> {
    let minor = comparator.minor.unwrap_or(0);
    let patch = comparator.patch.unwrap_or(0);

    match comparator.op {
        Op::Exact | Op::GreaterEq | Op::Tilde | Op::Caret | Op::Wildcard => {
            let mut version = Version::new(comparator.major, minor, patch);
            version.pre = comparator.pre.clone();
            Some(version)
        }
        Op::Greater => Some(match (comparator.minor, comparator.patch) {
            (Some(minor), Some(patch)) => Version::new(comparator.major, minor, patch + 1),
            (Some(minor), None) => Version::new(comparator.major, minor + 1, 0),
            (None, _) => Version::new(comparator.major + 1, 0, 0),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(ranges: &[&str]) -> Vec<String> {
        ranges.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn picks_most_preferred_server_range() {
        assert_eq!(
            select_protocol_version(&offer(&["^0.4.0"])),
            Some("^0.4.0".to_string())
        );
        assert_eq!(
            select_protocol_version(&offer(&["^0.2.0", "^0.3.0"])),
            Some("^0.3.0".to_string())
        );
    }

    #[test]
    fn empty_offer_falls_back_to_oldest_range() {
        assert_eq!(select_protocol_version(&[]), Some("^0.1.0".to_string()));
    }

    #[test]
    fn exact_versions_intersect_caret_ranges() {
        assert_eq!(
            select_protocol_version(&offer(&["0.4.2"])),
            Some("^0.4.0".to_string())
        );
        assert_eq!(
            select_protocol_version(&offer(&["=0.2.1"])),
            Some("^0.2.0".to_string())
        );
    }

    #[test]
    fn comparator_pairs_intersect() {
        assert_eq!(
            select_protocol_version(&offer(&[">=0.3.0, <0.5.0"])),
            Some("^0.4.0".to_string())
        );
        assert_eq!(
            select_protocol_version(&offer(&[">0.1.5, <0.2.3"])),
            Some("^0.2.0".to_string())
        );
    }

    #[test]
    fn wildcard_matches_everything() {
        assert_eq!(
            select_protocol_version(&offer(&["*"])),
            Some("^0.4.0".to_string())
        );
    }

    #[test]
    fn disjoint_offers_are_rejected() {
        assert_eq!(select_protocol_version(&offer(&["^9.0.0"])), None);
        assert_eq!(select_protocol_version(&offer(&["^1.0.0", "^2.0.0"])), None);
    }

    #[test]
    fn unparseable_offers_are_ignored() {
        assert_eq!(select_protocol_version(&offer(&["banana"])), None);
        assert_eq!(
            select_protocol_version(&offer(&["banana", "^0.4.1"])),
            Some("^0.4.0".to_string())
        );
    }

    #[test]
    fn upper_bound_only_offers_intersect_from_below() {
        assert_eq!(
            select_protocol_version(&offer(&["<0.2.0"])),
            Some("^0.1.0".to_string())
        );
    }
}
