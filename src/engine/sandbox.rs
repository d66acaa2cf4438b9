// Strategy sandbox: static admission screening of submitted strategy
// source, plus isolated, deadline-bounded execution of one decide()
// call per round.
//
// Strategies are Lua programs defining
//
//     function decide(opponent_history, my_history, round)
//
// where the histories are 1-indexed arrays of "cooperate"/"defect"
// strings and `round` is the 0-based round index. The function must
// return one of the two move symbols. Anything else — a timeout, a
// runtime error, a wrong return type — is a Fault, which the match
// simulator resolves to a forced defect for that side only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, LuaOptions, StdLib, Value, VmState};
use serde::{Deserialize, Serialize};

use crate::metrics;

/// How often (in VM instructions) the deadline hook fires.
const HOOK_INTERVAL: u32 = 512;

/// Per-invocation VM memory ceiling, in bytes.
const MEMORY_LIMIT: usize = 16 * 1024 * 1024;

/// Capability identifiers rejected at strategy save time. These are
/// also absent from the restricted VM; the screening pass exists so a
/// hostile submission is refused once at registration instead of
/// faulting on every round.
const DENYLIST: &[&str] = &[
    "require",
    "dofile",
    "loadfile",
    "loadstring",
    "load",
    "os",
    "io",
    "package",
    "debug",
    "coroutine",
    "collectgarbage",
    "getfenv",
    "setfenv",
    "_G",
];

/// One move in the iterated prisoner's dilemma.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Move {
    Cooperate,
    Defect,
}

impl Move {
    /// Canonical symbol passed to and stored for strategies.
    pub fn as_symbol(self) -> &'static str {
        match self {
            Move::Cooperate => "cooperate",
            Move::Defect => "defect",
        }
    }

    /// Parse a strategy's return value. Case-insensitive; the single
    /// letters "C"/"D" are accepted as aliases for compatibility with
    /// the original submission format.
    pub fn from_symbol(s: &str) -> Option<Move> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cooperate" | "c" => Some(Move::Cooperate),
            "defect" | "d" => Some(Move::Defect),
            _ => None,
        }
    }
}

/// A failed strategy invocation, absorbed at the round level.
/// Never propagated as an EngineError.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    #[error("decision deadline exceeded")]
    Timeout,
    #[error("strategy error: {0}")]
    Runtime(String),
    #[error("invalid move: {0}")]
    InvalidMove(String),
}

impl Fault {
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::Timeout => "timeout",
            Fault::Runtime(_) => "runtime",
            Fault::InvalidMove(_) => "invalid_move",
        }
    }
}

/// Sandbox tuning. Only the per-call deadline is configurable;
/// the stdlib restriction and memory ceiling are fixed.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub decide_timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            decide_timeout: Duration::from_millis(50),
        }
    }
}

/// The isolated execution boundary around one strategy invocation.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Invoke a strategy for one round. Every call gets a fresh VM, so
    /// no state survives between rounds or leaks between strategies.
    pub fn decide(
        &self,
        source: &str,
        opponent_history: &[Move],
        own_history: &[Move],
        round: u32,
    ) -> Result<Move, Fault> {
        let started = Instant::now();
        let result = self.decide_inner(source, opponent_history, own_history, round);
        metrics::DECIDE_DURATION_MS.observe(started.elapsed().as_secs_f64() * 1000.0);

        if let Err(ref fault) = result {
            metrics::SANDBOX_FAULTS_TOTAL
                .with_label_values(&[fault.kind()])
                .inc();
            tracing::warn!(round, %fault, "strategy fault, round resolves to defect");
        }
        result
    }

    fn decide_inner(
        &self,
        source: &str,
        opponent_history: &[Move],
        own_history: &[Move],
        round: u32,
    ) -> Result<Move, Fault> {
        let lua = fresh_vm().map_err(|e| Fault::Runtime(e.to_string()))?;

        // Deadline enforcement: the hook fires every HOOK_INTERVAL
        // instructions and aborts the VM once the wall clock passes the
        // deadline. Pure-Lua busy loops cannot dodge it.
        let timed_out = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + self.config.decide_timeout;
        {
            let timed_out = timed_out.clone();
            let _ = lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
                move |_lua, _debug| {
                    if Instant::now() >= deadline {
                        timed_out.store(true, Ordering::Relaxed);
                        Err(mlua::Error::RuntimeError(
                            "decision deadline exceeded".into(),
                        ))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        let call = (|| -> mlua::Result<Value> {
            lua.load(source).set_name("strategy").exec()?;
            let decide: mlua::Function = lua.globals().get("decide")?;
            let opponent = history_table(&lua, opponent_history)?;
            let own = history_table(&lua, own_history)?;
            decide.call::<Value>((opponent, own, round))
        })();
        lua.remove_hook();

        let value = call.map_err(|e| {
            if timed_out.load(Ordering::Relaxed) {
                Fault::Timeout
            } else {
                Fault::Runtime(e.to_string())
            }
        })?;

        match value {
            Value::String(s) => {
                let symbol = s.to_string_lossy().to_string();
                Move::from_symbol(&symbol).ok_or(Fault::InvalidMove(symbol))
            }
            other => Err(Fault::InvalidMove(format!(
                "expected a move string, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Static admission check, run once when a strategy is created or its
/// source updated — not per round.
pub fn screen_source(source: &str) -> Result<(), String> {
    if !contains_ident(source, "decide") {
        return Err("strategy must define a `decide` function".to_string());
    }
    for token in DENYLIST {
        if contains_ident(source, token) {
            return Err(format!("forbidden capability token `{token}`"));
        }
    }

    // Syntax check: compile in a throwaway VM without executing.
    let lua = fresh_vm().map_err(|e| e.to_string())?;
    lua.load(source)
        .set_name("strategy")
        .into_function()
        .map_err(|e| format!("syntax error: {e}"))?;
    Ok(())
}

/// Build a restricted VM exposing only pure computational primitives:
/// math, string and table libraries plus the base functions.
fn fresh_vm() -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::MATH | StdLib::STRING | StdLib::TABLE,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(MEMORY_LIMIT)?;

    // The base library still carries a few escape hatches even with
    // the reduced stdlib set.
    lua.load(
        r#"
        load = nil
        loadstring = nil
        dofile = nil
        loadfile = nil
        collectgarbage = nil
        print = function() end
    "#,
    )
    .set_name("sandbox_bootstrap")
    .exec()?;

    Ok(lua)
}

/// Move history as a 1-indexed Lua array of move symbols.
fn history_table(lua: &Lua, history: &[Move]) -> mlua::Result<mlua::Table> {
    let table = lua.create_table_with_capacity(history.len(), 0)?;
    for (i, m) in history.iter().enumerate() {
        table.set(i + 1, m.as_symbol())?;
    }
    Ok(table)
}

/// Identifier-boundary substring search: `load` matches `load(...)`
/// but not `download`.
fn contains_ident(source: &str, ident: &str) -> bool {
    let bytes = source.as_bytes();
    let mut from = 0;
    while let Some(pos) = source[from..].find(ident) {
        let begin = from + pos;
        let end = begin + ident.len();
        let boundary = |b: u8| !(b.is_ascii_alphanumeric() || b == b'_');
        let before_ok = begin == 0 || boundary(bytes[begin - 1]);
        let after_ok = end == bytes.len() || boundary(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        from = begin + 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default())
    }

    const ALWAYS_COOPERATE: &str = r#"
        function decide(opponent_history, my_history, round)
            return "cooperate"
        end
    "#;

    #[test]
    fn test_move_symbols() {
        assert_eq!(Move::from_symbol("cooperate"), Some(Move::Cooperate));
        assert_eq!(Move::from_symbol("Defect"), Some(Move::Defect));
        assert_eq!(Move::from_symbol("C"), Some(Move::Cooperate));
        assert_eq!(Move::from_symbol("d"), Some(Move::Defect));
        assert_eq!(Move::from_symbol("tit-for-tat"), None);
        assert_eq!(Move::Cooperate.as_symbol(), "cooperate");
        assert_eq!(Move::Defect.as_symbol(), "defect");
    }

    #[test]
    fn test_decide_basic() {
        let m = sandbox().decide(ALWAYS_COOPERATE, &[], &[], 0).unwrap();
        assert_eq!(m, Move::Cooperate);
    }

    #[test]
    fn test_decide_sees_histories_and_round() {
        // Mirror the opponent's last move; cooperate on round 0.
        let tit_for_tat = r#"
            function decide(opponent_history, my_history, round)
                if round == 0 then
                    return "cooperate"
                end
                return opponent_history[#opponent_history]
            end
        "#;
        let s = sandbox();
        assert_eq!(s.decide(tit_for_tat, &[], &[], 0).unwrap(), Move::Cooperate);
        assert_eq!(
            s.decide(tit_for_tat, &[Move::Defect], &[Move::Cooperate], 1)
                .unwrap(),
            Move::Defect
        );
        assert_eq!(
            s.decide(
                tit_for_tat,
                &[Move::Defect, Move::Cooperate],
                &[Move::Cooperate, Move::Defect],
                2
            )
            .unwrap(),
            Move::Cooperate
        );
    }

    #[test]
    fn test_decide_runtime_error_is_fault() {
        let throws = r#"
            function decide(opponent_history, my_history, round)
                error("boom")
            end
        "#;
        let fault = sandbox().decide(throws, &[], &[], 0).unwrap_err();
        assert!(matches!(fault, Fault::Runtime(_)));
    }

    #[test]
    fn test_decide_invalid_return_is_fault() {
        let wrong_symbol = r#"
            function decide() return "tit-for-tat" end
        "#;
        let fault = sandbox().decide(wrong_symbol, &[], &[], 0).unwrap_err();
        assert!(matches!(fault, Fault::InvalidMove(_)));

        let wrong_type = r#"
            function decide() return 42 end
        "#;
        let fault = sandbox().decide(wrong_type, &[], &[], 0).unwrap_err();
        assert!(matches!(fault, Fault::InvalidMove(_)));
    }

    #[test]
    fn test_decide_missing_entry_point_is_fault() {
        let fault = sandbox().decide("x = 1", &[], &[], 0).unwrap_err();
        assert!(matches!(fault, Fault::Runtime(_)));
    }

    #[test]
    fn test_decide_busy_loop_times_out() {
        let spin = r#"
            function decide()
                while true do end
            end
        "#;
        let s = Sandbox::new(SandboxConfig {
            decide_timeout: Duration::from_millis(20),
        });
        let started = Instant::now();
        let fault = s.decide(spin, &[], &[], 0).unwrap_err();
        assert_eq!(fault, Fault::Timeout);
        // The bound has to hold with generous slack for CI machines.
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_decide_context_is_fresh_per_invocation() {
        // Defects only if a global set by a previous call survived.
        let stateful = r#"
            function decide(opponent_history, my_history, round)
                if seen then
                    return "defect"
                end
                seen = true
                return "cooperate"
            end
        "#;
        let s = sandbox();
        for round in 0..3 {
            assert_eq!(s.decide(stateful, &[], &[], round).unwrap(), Move::Cooperate);
        }
    }

    #[test]
    fn test_vm_has_no_ambient_capabilities() {
        let probe = r#"
            function decide()
                if os ~= nil or io ~= nil or load ~= nil or dofile ~= nil then
                    return "defect"
                end
                return "cooperate"
            end
        "#;
        assert_eq!(sandbox().decide(probe, &[], &[], 0).unwrap(), Move::Cooperate);
    }

    #[test]
    fn test_screen_accepts_valid_strategy() {
        assert!(screen_source(ALWAYS_COOPERATE).is_ok());
    }

    #[test]
    fn test_screen_requires_entry_point() {
        assert!(screen_source("x = 1").is_err());
    }

    #[test]
    fn test_screen_rejects_denylist_tokens() {
        for source in [
            "function decide() return require('x') end",
            "function decide() return os.time() end",
            "function decide() io.write('hi') end",
            "function decide() return load('return 1')() end",
            "function decide() debug.sethook() end",
            "function decide() _G.x = 1 end",
        ] {
            assert!(screen_source(source).is_err(), "accepted: {source}");
        }
    }

    #[test]
    fn test_screen_rejects_syntax_errors() {
        assert!(screen_source("function decide( return end").is_err());
    }

    #[test]
    fn test_contains_ident_respects_boundaries() {
        assert!(contains_ident("load('x')", "load"));
        assert!(contains_ident("return os.time()", "os"));
        assert!(!contains_ident("local download = 1", "load"));
        assert!(!contains_ident("local pos = {}", "os"));
        assert!(!contains_ident("decider = 1", "decide"));
    }
}
