//! Small utility helpers used across modules.

use rand::Rng;

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Alphabet for match codes: uppercase alphanumerics minus the usual
/// look-alikes (0/O, 1/I/L) so codes survive being read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Generate a human-shareable match code of `len` characters.
/// Uniqueness is the caller's problem (re-roll on collision).
pub fn gen_match_code(len: usize) -> String {
  let mut rng = rand::thread_rng();
  (0..len)
    .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
    .collect()
}

/// Seconds since the Unix epoch. Wall-clock timestamps on match records only;
/// never used for gameplay timing.
pub fn now_secs() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut cut = max;
  while !s.is_char_boundary(cut) {
    cut -= 1;
  }
  format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn template_fills_all_keys() {
    let out = fill_template("{a} and {b} and {a}", &[("a", "x"), ("b", "y")]);
    assert_eq!(out, "x and y and x");
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 100), "short");
    let long = "é".repeat(50); // 100 bytes
    let out = trunc_for_log(&long, 3);
    assert!(out.starts_with('é'));
    assert!(out.contains("100 bytes total"));
  }

  #[test]
  fn match_codes_use_safe_alphabet() {
    for _ in 0..100 {
      let code = gen_match_code(6);
      assert_eq!(code.len(), 6);
      assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
    }
  }
}
