//! Message-header inspection for autoreply gating.
//!
//! An autoreply only fires when its owner is named in the visible To or
//! Cc headers; BCC-style deliveries stay silent. Header parsing failures
//! are treated as "nobody referenced" rather than an error, since a
//! malformed message must not block the rest of the pipeline.

use ahash::AHashSet;
use mailparse::{MailAddr, addrparse, parse_mail};
use tracing::debug;

use postern_common::Address;

/// Extract the subset of `user_addresses` that appear in the To or Cc
/// headers of `raw`. Header addresses are normalized the same way as
/// envelope addresses, so domain casing and punycode forms line up.
#[must_use]
pub fn referenced_users(
    raw: &[u8],
    user_addresses: &AHashSet<String>,
) -> AHashSet<String> {
    let mut referenced = AHashSet::new();

    let parsed = match parse_mail(raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            debug!("unparseable message headers: {error}");
            return referenced;
        }
    };

    for header in &parsed.headers {
        let key = header.get_key_ref();
        if !key.eq_ignore_ascii_case("to") && !key.eq_ignore_ascii_case("cc") {
            continue;
        }
        let Ok(list) = addrparse(&header.get_value()) else {
            continue;
        };
        for addr in list.iter() {
            match addr {
                MailAddr::Single(info) => {
                    collect(&info.addr, user_addresses, &mut referenced);
                }
                MailAddr::Group(group) => {
                    for info in &group.addrs {
                        collect(&info.addr, user_addresses, &mut referenced);
                    }
                }
            }
        }
    }

    referenced
}

fn collect(raw: &str, user_addresses: &AHashSet<String>, out: &mut AHashSet<String>) {
    if let Ok(address) = Address::normalize(raw) {
        let canonical = address.to_string();
        if user_addresses.contains(&canonical) {
            out.insert(canonical);
        }
    }
}
