//! Declared port properties, behaviors and constraints.
//!
//! Every output port declares how each property relates to the filter's
//! inputs ([`Behavior`]); every input port declares what it demands of
//! the upstream output ([`Constraint`]). The graph propagates known
//! values topologically and checks constraints on every edge, so timing
//! mistakes surface at connect time instead of as garbage samples.

use crate::error::TypeError;
use ringpipe::DType;

/// Semantic properties declared per port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    /// Payload element type.
    ElementType,
    /// Inter-sample interval in nanoseconds (0 = irregular).
    PeriodNs,
    /// Samples per emitted batch.
    BatchCapacity,
    /// `t_ns mod period_ns` of the stream; zero means grid-aligned.
    BatchPhaseNs,
    /// Fixed-rate stream flag.
    Regular,
}

impl Property {
    /// All properties, in table order.
    pub const ALL: [Property; 5] = [
        Property::ElementType,
        Property::PeriodNs,
        Property::BatchCapacity,
        Property::BatchPhaseNs,
        Property::Regular,
    ];

    #[inline]
    pub(crate) fn index(self) -> usize {
        match self {
            Property::ElementType => 0,
            Property::PeriodNs => 1,
            Property::BatchCapacity => 2,
            Property::BatchPhaseNs => 3,
            Property::Regular => 4,
        }
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Property::ElementType => "element_type",
            Property::PeriodNs => "period_ns",
            Property::BatchCapacity => "batch_capacity",
            Property::BatchPhaseNs => "batch_phase_ns",
            Property::Regular => "regular",
        };
        f.write_str(name)
    }
}

/// A property value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropValue {
    /// Element type (for [`Property::ElementType`]).
    DType(DType),
    /// Nanosecond quantity (period, phase).
    U64(u64),
    /// Sample count (batch capacity).
    Usize(usize),
    /// Flag (regular).
    Bool(bool),
}

impl std::fmt::Display for PropValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropValue::DType(d) => write!(f, "{d}"),
            PropValue::U64(v) => write!(f, "{v}"),
            PropValue::Usize(v) => write!(f, "{v}"),
            PropValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Known property values of a stream at some port. `None` = unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PropertyTable {
    values: [Option<PropValue>; 5],
}

impl PropertyTable {
    /// Empty table: everything unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of `prop`, if known.
    #[inline]
    pub fn get(&self, prop: Property) -> Option<PropValue> {
        self.values[prop.index()]
    }

    /// Sets `prop` to a known value.
    #[inline]
    pub fn set(&mut self, prop: Property, value: PropValue) {
        self.values[prop.index()] = Some(value);
    }

    /// Marks `prop` unknown.
    #[inline]
    pub fn clear(&mut self, prop: Property) {
        self.values[prop.index()] = None;
    }

    /// Builder form of [`set`](Self::set).
    pub fn with(mut self, prop: Property, value: PropValue) -> Self {
        self.set(prop, value);
        self
    }

    /// Element type, if known.
    pub fn dtype(&self) -> Option<DType> {
        match self.get(Property::ElementType) {
            Some(PropValue::DType(d)) => Some(d),
            _ => None,
        }
    }

    /// Sample period in ns, if known.
    pub fn period_ns(&self) -> Option<u64> {
        match self.get(Property::PeriodNs) {
            Some(PropValue::U64(v)) => Some(v),
            _ => None,
        }
    }

    /// Batch capacity, if known.
    pub fn batch_capacity(&self) -> Option<usize> {
        match self.get(Property::BatchCapacity) {
            Some(PropValue::Usize(v)) => Some(v),
            _ => None,
        }
    }

    /// Stream phase in ns, if known.
    pub fn phase_ns(&self) -> Option<u64> {
        match self.get(Property::BatchPhaseNs) {
            Some(PropValue::U64(v)) => Some(v),
            _ => None,
        }
    }

    /// Regular-stream flag, if known.
    pub fn regular(&self) -> Option<bool> {
        match self.get(Property::Regular) {
            Some(PropValue::Bool(v)) => Some(v),
            _ => None,
        }
    }

    /// Intersection across input ports: a property is known only where
    /// every table agrees. Used to feed `Preserve`/`Adapt` behaviors of
    /// multi-input filters.
    pub fn merge(tables: &[PropertyTable]) -> PropertyTable {
        let mut out = PropertyTable::new();
        let Some((first, rest)) = tables.split_first() else {
            return out;
        };
        for prop in Property::ALL {
            let v = first.get(prop);
            if v.is_some() && rest.iter().all(|t| t.get(prop) == v) {
                out.values[prop.index()] = v;
            }
        }
        out
    }
}

/// How an output property relates to the filter's inputs.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Produces a known value regardless of input.
    Set(PropValue),
    /// Output value equals the (merged) input value.
    Preserve,
    /// Output value is a function of the (merged) input value.
    Adapt(fn(Option<PropValue>) -> Option<PropValue>),
    /// Cannot be determined statically.
    Unknown,
}

/// Declared behaviors of one output port, one per property.
#[derive(Debug, Clone, Copy)]
pub struct OutputSpec {
    behaviors: [Behavior; 5],
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            behaviors: [Behavior::Unknown; 5],
        }
    }
}

impl OutputSpec {
    /// All-unknown spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spec that preserves every property (element-wise filters).
    pub fn preserve_all() -> Self {
        Self {
            behaviors: [Behavior::Preserve; 5],
        }
    }

    /// Declares `prop` as produced with a fixed value.
    pub fn set(mut self, prop: Property, value: PropValue) -> Self {
        self.behaviors[prop.index()] = Behavior::Set(value);
        self
    }

    /// Declares `prop` as passed through from input.
    pub fn preserve(mut self, prop: Property) -> Self {
        self.behaviors[prop.index()] = Behavior::Preserve;
        self
    }

    /// Declares `prop` as a function of the input value.
    pub fn adapt(mut self, prop: Property, f: fn(Option<PropValue>) -> Option<PropValue>) -> Self {
        self.behaviors[prop.index()] = Behavior::Adapt(f);
        self
    }

    /// Declares `prop` as statically unknowable.
    pub fn unknown(mut self, prop: Property) -> Self {
        self.behaviors[prop.index()] = Behavior::Unknown;
        self
    }

    /// Behavior declared for `prop`.
    pub fn behavior(&self, prop: Property) -> Behavior {
        self.behaviors[prop.index()]
    }

    /// Computes the effective output table given the merged input table.
    /// Unknown cascades unless a behavior `Set`s the property.
    pub fn apply(&self, upstream: &PropertyTable) -> PropertyTable {
        let mut out = PropertyTable::new();
        for prop in Property::ALL {
            let value = match self.behaviors[prop.index()] {
                Behavior::Set(v) => Some(v),
                Behavior::Preserve => upstream.get(prop),
                Behavior::Adapt(f) => f(upstream.get(prop)),
                Behavior::Unknown => None,
            };
            if let Some(v) = value {
                out.set(prop, v);
            }
        }
        out
    }
}

/// What an input port demands of the upstream output.
#[derive(Debug, Clone, Copy, Default)]
pub enum Constraint {
    /// No demand.
    #[default]
    Any,
    /// Value must equal this exactly.
    Eq(PropValue),
    /// Numeric value must be a multiple of this (batch capacity).
    MultipleOf(u64),
    /// Phase must be an integer multiple of the stream period, i.e. the
    /// stream sits on its own sample grid.
    Aligned,
    /// Flag must have this value.
    Flag(bool),
}

/// Declared constraints of one input port.
#[derive(Debug, Clone, Copy)]
pub struct InputSpec {
    constraints: [Constraint; 5],
    required: bool,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            constraints: [Constraint::Any; 5],
            required: true,
        }
    }
}

impl InputSpec {
    /// Unconstrained, required input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this input optional: `validate` will not demand an edge.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// `true` when the graph must reject a missing edge.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Adds a constraint on `prop`.
    pub fn constrain(mut self, prop: Property, c: Constraint) -> Self {
        self.constraints[prop.index()] = c;
        self
    }

    /// Constraint declared on `prop`.
    pub fn constraint(&self, prop: Property) -> Constraint {
        self.constraints[prop.index()]
    }

    /// Checks the upstream computed table against this port's
    /// constraints. Unknown upstream values pass (deferred to runtime
    /// checks inside the worker).
    pub fn check(
        &self,
        upstream: &PropertyTable,
        filter: &str,
        port: usize,
    ) -> Result<(), TypeError> {
        for prop in Property::ALL {
            let constraint = self.constraints[prop.index()];
            let Some(actual) = upstream.get(prop) else {
                continue;
            };
            let violation: Option<String> = match constraint {
                Constraint::Any => None,
                Constraint::Eq(expected) => {
                    (actual != expected).then(|| expected.to_string())
                }
                Constraint::MultipleOf(m) => {
                    let v = match actual {
                        PropValue::U64(v) => v,
                        PropValue::Usize(v) => v as u64,
                        _ => continue,
                    };
                    (m == 0 || v % m != 0).then(|| format!("multiple of {m}"))
                }
                Constraint::Aligned => {
                    // Needs both phase and period; defer if either unknown.
                    let (Some(phase), Some(period)) =
                        (upstream.phase_ns(), upstream.period_ns())
                    else {
                        continue;
                    };
                    (period > 0 && phase % period != 0)
                        .then(|| format!("phase aligned to period {period}"))
                }
                Constraint::Flag(expected) => match actual {
                    PropValue::Bool(b) => (b != expected).then(|| expected.to_string()),
                    _ => None,
                },
            };
            if let Some(expected) = violation {
                return Err(TypeError {
                    filter: filter.to_string(),
                    port,
                    property: prop,
                    expected,
                    actual: actual.to_string(),
                });
            }
        }
        Ok(())
    }
}
