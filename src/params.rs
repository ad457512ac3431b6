//! Process-wide typed parameter registry.
//!
//! Every runtime-configurable knob lives here: UCI options, search
//! margins, time-management settings. Parameters are registered once at
//! start-up, carry listeners that fire on every set, and are the single
//! mutable process-wide surface. Changing parameters while a search is
//! running is not supported; the front-end quiesces the workers first.
//!
//! Invalid sets (unknown name, out-of-range value) are ignored and the
//! prior value retained; the caller is expected to emit a protocol
//! warning.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamSpec {
    Check { default: bool },
    Spin { default: i32, min: i32, max: i32 },
    Combo { default: String, allowed: Vec<String> },
    Text { default: String },
    Button,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamValue {
    Bool(bool),
    Int(i32),
    Text(String),
    Action,
}

type Listener = Box<dyn Fn(&ParamValue) + Send + Sync>;

struct ParamState {
    value: ParamValue,
    listeners: HashMap<usize, Listener>,
    next_listener_id: usize,
}

pub struct Param {
    name: String,
    spec: ParamSpec,
    state: Mutex<ParamState>,
}

impl Param {
    fn new(name: &str, spec: ParamSpec) -> Self {
        let value = match &spec {
            ParamSpec::Check { default } => ParamValue::Bool(*default),
            ParamSpec::Spin { default, .. } => ParamValue::Int(*default),
            ParamSpec::Combo { default, .. } | ParamSpec::Text { default } => {
                ParamValue::Text(default.clone())
            }
            ParamSpec::Button => ParamValue::Action,
        };
        Param {
            name: name.to_owned(),
            spec,
            state: Mutex::new(ParamState {
                value,
                listeners: HashMap::new(),
                next_listener_id: 0,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn spec(&self) -> &ParamSpec {
        &self.spec
    }

    /// Parse and apply a textual value. Returns false (leaving the prior
    /// value in place) when the value does not fit the spec.
    pub fn set(&self, text: &str) -> bool {
        let new_value = match &self.spec {
            ParamSpec::Check { .. } => match text.to_ascii_lowercase().as_str() {
                "true" => ParamValue::Bool(true),
                "false" => ParamValue::Bool(false),
                _ => return false,
            },
            ParamSpec::Spin { min, max, .. } => match text.parse::<i32>() {
                Ok(v) if (*min..=*max).contains(&v) => ParamValue::Int(v),
                _ => return false,
            },
            ParamSpec::Combo { allowed, .. } => {
                match allowed
                    .iter()
                    .find(|a| a.eq_ignore_ascii_case(text))
                {
                    Some(v) => ParamValue::Text(v.clone()),
                    None => return false,
                }
            }
            ParamSpec::Text { .. } => ParamValue::Text(text.to_owned()),
            ParamSpec::Button => ParamValue::Action,
        };
        let mut state = self.state.lock();
        state.value = new_value;
        let value = state.value.clone();
        // Listeners run under the lock; they are short cache updates.
        for listener in state.listeners.values() {
            listener(&value);
        }
        true
    }

    /// Attach a listener, optionally invoking it with the current value.
    pub fn add_listener(&self, f: Listener, call_now: bool) -> usize {
        let mut state = self.state.lock();
        let id = state.next_listener_id;
        state.next_listener_id += 1;
        if call_now {
            f(&state.value);
        }
        state.listeners.insert(id, f);
        id
    }

    pub fn remove_listener(&self, id: usize) {
        self.state.lock().listeners.remove(&id);
    }

    #[must_use]
    pub fn get_bool(&self) -> bool {
        match self.state.lock().value {
            ParamValue::Bool(b) => b,
            _ => panic!("parameter {} is not a check", self.name),
        }
    }

    #[must_use]
    pub fn get_int(&self) -> i32 {
        match self.state.lock().value {
            ParamValue::Int(v) => v,
            _ => panic!("parameter {} is not a spin", self.name),
        }
    }

    #[must_use]
    pub fn get_text(&self) -> String {
        match &self.state.lock().value {
            ParamValue::Text(s) => s.clone(),
            _ => panic!("parameter {} is not a string", self.name),
        }
    }
}

/// The registry: name-keyed parameters in registration order.
pub struct Parameters {
    params: RwLock<HashMap<String, Arc<Param>>>,
    order: RwLock<Vec<String>>,
}

impl Parameters {
    fn new() -> Self {
        let registry = Parameters {
            params: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        };
        registry.register_defaults();
        registry
    }

    pub fn register(&self, name: &str, spec: ParamSpec) -> Arc<Param> {
        let param = Arc::new(Param::new(name, spec));
        let key = name.to_ascii_lowercase();
        let mut params = self.params.write();
        assert!(
            !params.contains_key(&key),
            "duplicate parameter {name}"
        );
        params.insert(key, Arc::clone(&param));
        self.order.write().push(name.to_owned());
        param
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Param>> {
        self.params.read().get(&name.to_ascii_lowercase()).cloned()
    }

    /// Apply a set request. Returns false for unknown names or bad
    /// values; the prior value is retained either way.
    pub fn set(&self, name: &str, value: &str) -> bool {
        match self.get(name) {
            Some(p) => p.set(value),
            None => false,
        }
    }

    #[must_use]
    pub fn get_bool(&self, name: &str) -> bool {
        self.get(name).expect("unknown parameter").get_bool()
    }

    #[must_use]
    pub fn get_int(&self, name: &str) -> i32 {
        self.get(name).expect("unknown parameter").get_int()
    }

    #[must_use]
    pub fn get_text(&self, name: &str) -> String {
        self.get(name).expect("unknown parameter").get_text()
    }

    /// Registered names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    fn register_defaults(&self) {
        let spin = |d, lo, hi| ParamSpec::Spin {
            default: d,
            min: lo,
            max: hi,
        };

        self.register("Threads", spin(1, 1, 512));
        self.register("Hash", spin(16, 1, 1 << 20));
        self.register("MultiPV", spin(1, 1, 256));
        self.register("Ponder", ParamSpec::Check { default: false });
        self.register("UCI_AnalyseMode", ParamSpec::Check { default: false });
        self.register("OwnBook", ParamSpec::Check { default: false });
        self.register("UseNullMove", ParamSpec::Check { default: true });
        self.register("AnalysisAgeHash", ParamSpec::Check { default: true });
        self.register("Clear Hash", ParamSpec::Button);

        self.register("Strength", spin(1000, 0, 1000));
        self.register("MaxNPS", spin(0, 0, 10_000_000));
        self.register("UCI_LimitStrength", ParamSpec::Check { default: false });
        self.register("UCI_Elo", spin(1500, 1000, 3200));

        self.register("Contempt", spin(0, -1000, 1000));
        self.register("AnalyzeContempt", spin(0, -1000, 1000));
        self.register("AutoContempt", ParamSpec::Check { default: false });

        self.register("GaviotaTbPath", ParamSpec::Text { default: String::new() });
        self.register("GaviotaTbCache", spin(1, 1, 2047));
        self.register("SyzygyPath", ParamSpec::Text { default: String::new() });
        self.register("MinProbeDepth", spin(1, 0, 100));
        self.register("MinProbeDepth6", spin(1, 0, 100));
        self.register("MinProbeDepth6dtz", spin(1, 0, 100));
        self.register("MinProbeDepth7", spin(12, 0, 100));
        self.register("MinProbeDepth7dtz", spin(12, 0, 100));

        // Evaluation corrections.
        self.register("KnightVsQueenBonus1", spin(125, 0, 200));
        self.register("KnightVsQueenBonus2", spin(380, 0, 600));
        self.register("KnightVsQueenBonus3", spin(405, 0, 800));
        self.register("RookVsPawnBonus", spin(107, 0, 400));

        // Search knobs.
        self.register("AspirationWindow", spin(9, 1, 100));
        self.register("RootLMRMoveCount", spin(2, 0, 100));
        self.register("RazorMargin1", spin(86, 1, 500));
        self.register("RazorMargin2", spin(353, 1, 1000));
        self.register("ReverseFutilityMargin1", spin(102, 1, 1000));
        self.register("ReverseFutilityMargin2", spin(210, 1, 1000));
        self.register("ReverseFutilityMargin3", spin(267, 1, 2000));
        self.register("ReverseFutilityMargin4", spin(394, 1, 3000));
        self.register("FutilityMargin1", spin(61, 1, 500));
        self.register("FutilityMargin2", spin(144, 1, 500));
        self.register("FutilityMargin3", spin(268, 1, 1000));
        self.register("FutilityMargin4", spin(334, 1, 1000));
        self.register("LMPMoveCountLimit1", spin(3, 1, 256));
        self.register("LMPMoveCountLimit2", spin(6, 1, 256));
        self.register("LMPMoveCountLimit3", spin(12, 1, 256));
        self.register("LMPMoveCountLimit4", spin(24, 1, 256));
        self.register("LMRMoveCountLimit1", spin(3, 1, 256));
        self.register("LMRMoveCountLimit2", spin(12, 1, 256));
        self.register("QuiesceMaxSortMoves", spin(8, 0, 256));
        self.register("DeltaPruningMargin", spin(152, 0, 1000));

        // Time management.
        self.register("TimeMaxRemainingMoves", spin(35, 2, 200));
        self.register("BufferTime", spin(1000, 1, 10_000));
        self.register("MinTimeUsage", spin(85, 1, 100));
        self.register("MaxTimeUsage", spin(400, 100, 1000));
        self.register("TimePonderHitRate", spin(35, 0, 99));

        // Half-move-clock eval scaling, one slot per 10-ply bucket.
        let factors = [128, 128, 128, 128, 44, 35, 29, 25, 20, 17];
        for (i, f) in factors.iter().enumerate() {
            self.register(&format!("HalfMoveFactor{}", i + 1), spin(*f, 0, 192));
        }
    }
}

/// The global registry.
pub fn parameters() -> &'static Parameters {
    static INSTANCE: Lazy<Parameters> = Lazy::new(Parameters::new);
    &INSTANCE
}

/// Read the half-move factor table from the registry.
#[must_use]
pub fn half_move_factor_table() -> [i32; 10] {
    let registry = parameters();
    std::array::from_fn(|i| registry.get_int(&format!("HalfMoveFactor{}", i + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn defaults_are_registered() {
        let p = parameters();
        assert_eq!(p.get_int("Threads"), 1);
        assert!(p.get_bool("UseNullMove"));
        assert_eq!(p.get_int("RazorMargin1"), 86);
        assert_eq!(p.get_text("SyzygyPath"), "");
    }

    #[test]
    fn bad_sets_are_ignored() {
        let p = Parameters::new();
        assert!(!p.set("NoSuchOption", "1"));
        assert!(!p.set("Threads", "0"));
        assert!(!p.set("Threads", "notanumber"));
        assert_eq!(p.get_int("Threads"), 1);
        assert!(p.set("Threads", "4"));
        assert_eq!(p.get_int("Threads"), 4);
    }

    #[test]
    fn listeners_fire_on_set() {
        let p = Parameters::new();
        static SEEN: AtomicI32 = AtomicI32::new(0);
        let param = p.get("AspirationWindow").unwrap();
        param.add_listener(
            Box::new(|v| {
                if let ParamValue::Int(v) = v {
                    SEEN.store(*v, Ordering::SeqCst);
                }
            }),
            true,
        );
        assert_eq!(SEEN.load(Ordering::SeqCst), 9);
        assert!(p.set("AspirationWindow", "20"));
        assert_eq!(SEEN.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn button_notifies_without_value() {
        let p = Parameters::new();
        static PRESSED: AtomicI32 = AtomicI32::new(0);
        let param = p.get("Clear Hash").unwrap();
        param.add_listener(
            Box::new(|_| {
                PRESSED.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        );
        assert!(p.set("Clear Hash", ""));
        assert_eq!(PRESSED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn table_parameters_fold_back() {
        let table = half_move_factor_table();
        assert_eq!(table[0], 128);
        assert_eq!(table[4], 44);
        assert_eq!(table[9], 17);
    }

    #[test]
    fn combo_case_insensitive() {
        let p = Parameters::new();
        p.register(
            "Style",
            ParamSpec::Combo {
                default: "Normal".into(),
                allowed: vec!["Normal".into(), "Aggressive".into()],
            },
        );
        assert!(p.set("style", "aggressive"));
        assert_eq!(p.get_text("Style"), "Aggressive");
        assert!(!p.set("Style", "bogus"));
        assert_eq!(p.get_text("Style"), "Aggressive");
    }
}
