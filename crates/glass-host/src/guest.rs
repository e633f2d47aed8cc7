//! Built-in guest program.
//!
//! The primitives the platform demonstrates — counter accumulation,
//! fixed-window rate limiting, session issuance/validation, and two-tier
//! feature flags — live in guest code, expressed purely as `get_state` /
//! `set_state` calls through the ABI bridge. The host has no special
//! knowledge of them.
//!
//! The module is embedded as WAT and compiled at startup when no external
//! guest binary is configured. Its exports all use u64 signatures:
//!
//! - `add(a, b)` — accumulate into the `counter` key
//! - `rate_limit(client_id, limit, window_secs)` — remaining budget, or 0
//!   when denied
//! - `create_session(user_id)` — issue a session id
//! - `validate_session(session_id)` — owning user id, or 0 for no session
//! - `check_feature_flag(user_id, flag_id)` — per-user override, falling
//!   back to the global flag value
//!
//! Known, deliberate properties (kept for compatibility with the platform
//! contract rather than fixed silently):
//! - `rate_limit` is a non-atomic check-then-act across two ABI calls; two
//!   concurrent calls for the same client and window can both observe the
//!   same count and both proceed, exceeding the limit.
//! - `create_session` uses a fixed-offset placeholder generator, not an
//!   unpredictable one.
//! - `validate_session` returning 0 is ambiguous with a legitimate user id
//!   of 0.
//! - State writes narrow to 32 bits on the wire, so counters above 2^32-1
//!   truncate on write while reads return the full stored 64-bit value.

/// WAT source of the built-in guest program.
///
/// Memory layout: key fragments live in data segments below 128, the clock
/// scratch word at 256, the decimal-digit scratch buffer below 532, and
/// keys are assembled from 1024 upward.
pub const GUEST_WAT: &str = r#"
(module
  (import "env" "set_state" (func $set_state (param i32 i32 i32)))
  (import "env" "get_state" (func $get_state (param i32 i32) (result i64)))
  (import "wasi_snapshot_preview1" "clock_time_get"
    (func $clock_time_get (param i32 i64 i32) (result i32)))

  (memory (export "memory") 1)

  ;; key fragments
  (data (i32.const 0) "counter")
  (data (i32.const 16) "rate_limit:")
  (data (i32.const 32) "session:")
  (data (i32.const 48) "flag:")
  (data (i32.const 64) ":user:")
  (data (i32.const 80) "flag:global:")
  (data (i32.const 96) ":")

  ;; copy $len bytes from $src to $dst, return the new end of $dst
  (func $append (param $dst i32) (param $src i32) (param $len i32) (result i32)
    (memory.copy (local.get $dst) (local.get $src) (local.get $len))
    (i32.add (local.get $dst) (local.get $len)))

  ;; append the decimal representation of $val at $dst, return the new end
  (func $append_u64 (param $dst i32) (param $val i64) (result i32)
    (local $p i32)
    (local $len i32)
    (local.set $p (i32.const 532))
    (loop $digits
      (local.set $p (i32.sub (local.get $p) (i32.const 1)))
      (i32.store8 (local.get $p)
        (i32.add (i32.const 48)
          (i32.wrap_i64 (i64.rem_u (local.get $val) (i64.const 10)))))
      (local.set $val (i64.div_u (local.get $val) (i64.const 10)))
      (br_if $digits (i64.ne (local.get $val) (i64.const 0))))
    (local.set $len (i32.sub (i32.const 532) (local.get $p)))
    (memory.copy (local.get $dst) (local.get $p) (local.get $len))
    (i32.add (local.get $dst) (local.get $len)))

  ;; wall-clock seconds via the WASI realtime clock
  (func $now_secs (result i64)
    (drop (call $clock_time_get (i32.const 0) (i64.const 1) (i32.const 256)))
    (i64.div_u (i64.load (i32.const 256)) (i64.const 1000000000)))

  ;; build "session:<id>" at 1024, return the key length
  (func $session_key (param $id i64) (result i32)
    (local $end i32)
    (local.set $end (call $append (i32.const 1024) (i32.const 32) (i32.const 8)))
    (local.set $end (call $append_u64 (local.get $end) (local.get $id)))
    (i32.sub (local.get $end) (i32.const 1024)))

  (func (export "add") (param $a i64) (param $b i64) (result i64)
    (local $new i64)
    (local.set $new
      (i64.add
        (i64.add (call $get_state (i32.const 0) (i32.const 7)) (local.get $a))
        (local.get $b)))
    ;; the wire value is 32-bit; sums above 2^32-1 truncate here
    (call $set_state (i32.const 0) (i32.const 7) (i32.wrap_i64 (local.get $new)))
    (local.get $new))

  (func (export "rate_limit")
      (param $client i64) (param $limit i64) (param $window_secs i64) (result i64)
    (local $end i32)
    (local $len i32)
    (local $current i64)
    (if (i64.eqz (local.get $window_secs))
      (then (local.set $window_secs (i64.const 1))))
    ;; "rate_limit:<client>:<window>"
    (local.set $end (call $append (i32.const 1024) (i32.const 16) (i32.const 11)))
    (local.set $end (call $append_u64 (local.get $end) (local.get $client)))
    (local.set $end (call $append (local.get $end) (i32.const 96) (i32.const 1)))
    (local.set $end (call $append_u64 (local.get $end)
      (i64.div_u (call $now_secs) (local.get $window_secs))))
    (local.set $len (i32.sub (local.get $end) (i32.const 1024)))
    ;; check-then-act across two ABI calls; racy under concurrency
    (local.set $current (call $get_state (i32.const 1024) (local.get $len)))
    (if (i64.ge_u (local.get $current) (local.get $limit))
      (then (return (i64.const 0))))
    (call $set_state (i32.const 1024) (local.get $len)
      (i32.wrap_i64 (i64.add (local.get $current) (i64.const 1))))
    (i64.sub (i64.sub (local.get $limit) (local.get $current)) (i64.const 1)))

  (func (export "create_session") (param $user i64) (result i64)
    (local $id i64)
    (local $len i32)
    ;; placeholder generator: fixed offset from the user id
    (local.set $id (i64.add (local.get $user) (i64.const 100000)))
    (local.set $len (call $session_key (local.get $id)))
    (call $set_state (i32.const 1024) (local.get $len) (i32.wrap_i64 (local.get $user)))
    (local.get $id))

  (func (export "validate_session") (param $id i64) (result i64)
    (call $get_state (i32.const 1024) (call $session_key (local.get $id))))

  (func (export "check_feature_flag") (param $user i64) (param $flag i64) (result i64)
    (local $end i32)
    ;; per-user override: "flag:<user>:user:<flag>"
    (local.set $end (call $append (i32.const 1024) (i32.const 48) (i32.const 5)))
    (local.set $end (call $append_u64 (local.get $end) (local.get $user)))
    (local.set $end (call $append (local.get $end) (i32.const 64) (i32.const 6)))
    (local.set $end (call $append_u64 (local.get $end) (local.get $flag)))
    (if (i64.ne
          (call $get_state (i32.const 1024) (i32.sub (local.get $end) (i32.const 1024)))
          (i64.const 0))
      (then (return (i64.const 1))))
    ;; fall back to "flag:global:<flag>"
    (local.set $end (call $append (i32.const 1024) (i32.const 80) (i32.const 12)))
    (local.set $end (call $append_u64 (local.get $end) (local.get $flag)))
    (call $get_state (i32.const 1024) (i32.sub (local.get $end) (i32.const 1024))))
)
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_wat_imports_only_host_abi() {
        // The guest must require nothing beyond the two env functions and
        // the WASI shim.
        assert!(GUEST_WAT.contains(r#"(import "env" "set_state""#));
        assert!(GUEST_WAT.contains(r#"(import "env" "get_state""#));
        assert!(!GUEST_WAT.contains(r#"(import "env" "log""#));
    }

    #[test]
    fn test_guest_wat_exports() {
        for export in [
            "add",
            "rate_limit",
            "create_session",
            "validate_session",
            "check_feature_flag",
            "memory",
        ] {
            assert!(
                GUEST_WAT.contains(&format!(r#"(export "{export}")"#)),
                "missing export {export}"
            );
        }
    }
}
