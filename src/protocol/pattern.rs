// ABOUTME: OSC address pattern matching
// ABOUTME: Single left-to-right scan supporting ?, *, [...] classes and {...} alternatives

/// Match an incoming `address` against a listener's address `pattern`.
///
/// - `?` matches any one character
/// - `*` skips forward to the next occurrence of the character that follows
///   it (no backtracking); a trailing `*` matches the rest of the address
/// - `[abc]`, `[a-z]`, `[!a-z]` match one character against a set or range
/// - `{foo,bar}` matches the first listed alternative the address continues with
///
/// Anything else must match literally. Malformed patterns (an unclosed
/// `[` or `{`) never match.
pub fn pattern_match(address: &str, pattern: &str) -> bool {
    let seq = address.as_bytes();
    let pat = pattern.as_bytes();
    let (mut s, mut p) = (0usize, 0usize);

    while s < seq.len() && p < pat.len() {
        match pat[p] {
            b'?' => {}
            b'*' => {
                p += 1;
                if p == pat.len() {
                    return true;
                }
                while s < seq.len() && seq[s] != pat[p] {
                    s += 1;
                }
                if s == seq.len() {
                    return false;
                }
            }
            b'[' => match match_class(seq[s], pat, p + 1) {
                Some(close) => p = close,
                None => return false,
            },
            b'{' => match match_alternatives(&seq[s..], pat, p + 1) {
                Some((consumed, close)) => {
                    s += consumed;
                    p = close + 1;
                    continue;
                }
                None => return false,
            },
            literal => {
                if seq[s] != literal {
                    return false;
                }
            }
        }
        s += 1;
        p += 1;
    }

    // '*' may match nothing at the very end
    while p < pat.len() && pat[p] == b'*' {
        p += 1;
    }
    s == seq.len() && p == pat.len()
}

/// Test `c` against the class starting at `start` (just past '[').
/// Returns the index of the closing ']' on a match.
fn match_class(c: u8, pat: &[u8], start: usize) -> Option<usize> {
    let mut p = start;
    let negate = pat.get(p) == Some(&b'!');
    if negate {
        p += 1;
    }

    let inside = if pat.get(p + 1) == Some(&b'-') {
        let mut lo = *pat.get(p)?;
        let mut hi = *pat.get(p + 2)?;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        p += 3;
        lo <= c && c <= hi
    } else {
        let mut found = false;
        while p < pat.len() && pat[p] != b']' {
            if pat[p] == c {
                found = true;
            }
            p += 1;
        }
        found
    };

    let close = p + pat.get(p..)?.iter().position(|&b| b == b']')?;
    (inside != negate).then_some(close)
}

/// Try each comma-separated alternative starting at `start` (just past '{')
/// against the front of `seq`. Returns the consumed length and the index of
/// the closing '}'.
fn match_alternatives(seq: &[u8], pat: &[u8], start: usize) -> Option<(usize, usize)> {
    let close = start + pat.get(start..)?.iter().position(|&b| b == b'}')?;
    pat[start..close]
        .split(|&b| b == b',')
        .find(|alternative| seq.starts_with(alternative))
        .map(|alternative| (alternative.len(), close))
}
