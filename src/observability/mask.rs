//! PII anonymization for values exposed to the live feed.

/// Mask a source address. IPv4 keeps the leading octets and drops the
/// host octet; IPv6 keeps the first two groups.
///
/// `203.0.113.77` → `203.0.113.x`
pub fn mask_ip(ip: &str) -> String {
    if ip.contains(':') {
        let groups: Vec<&str> = ip.split(':').take(2).collect();
        return format!("{}::x", groups.join(":"));
    }

    match ip.rsplit_once('.') {
        Some((prefix, _host)) => format!("{prefix}.x"),
        None => "x".to_string(),
    }
}

/// Mask a user id to a 4-prefix/2-suffix reveal.
///
/// Counted in characters, not bytes, so multibyte subjects never land
/// a cut inside a code point.
///
/// `abcdefgh-1234-wxyz` → `abcd***yz`
pub fn mask_user_id(id: &str) -> String {
    let total = id.chars().count();
    if total <= 8 {
        return "***".to_string();
    }
    let prefix: String = id.chars().take(4).collect();
    let suffix: String = id.chars().skip(total - 2).collect();
    format!("{prefix}***{suffix}")
}
