//! Resolves the absolute trigger times of a sink by walking its trigger tree back to the root.
//!
//! ## Walk
//! Starting from the sink's trigger input, the resolver repeatedly asks the input for its source.
//! Each hop is recorded as a [`TriggerLink`]: the source path and the edge polarity of the input
//! consuming it. If the HAL owning the source can itself be triggered, the walk continues from the
//! input governing that source (for an AWG marker, its channel's input); otherwise the source is
//! the root of the tree and the walk stops. Meeting a source twice means the sources form a loop,
//! which is reported as [`TimingError::CyclicTriggerDependency`].
//!
//! ## Composition
//! The chain is replayed root first, seeded with a single trigger at `t = 0`. Every hop reports
//! its local edges relative to its own trigger, so each previous global time is combined with each
//! local time (previous time in the outer loop, local time in the inner loop). A root with one
//! edge feeding a marker with three edges thus yields three global edges; a two-edge root would
//! yield six.
//!
//! Gated intervals are translated the same way, but only those of the last hop are returned: an
//! interval of an upstream hop does not describe the level seen by the sink.

use ndarray::{array, Array1, Array2};

use crate::error::{Result, TimingError};
use crate::lab::Laboratory;
use crate::path::ObjectPath;
use crate::trigger::*;
use crate::utils::*;

/// One hop of a trigger chain.
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerLink {
    pub source: ObjectPath,
    /// Edge polarity of the input consuming `source`
    pub polarity: Polarity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedTrigger {
    pub edges: Array1<f64>,
    /// `N x 2` gated intervals of the last hop
    pub gated: Array2<f64>,
    /// Hops ordered from the sink towards the root
    pub chain: Vec<TriggerLink>,
}

impl ResolvedTrigger {
    pub fn empty() -> Self {
        ResolvedTrigger {
            edges: Array1::zeros(0),
            gated: Array2::zeros((0, 2)),
            chain: Vec::new(),
        }
    }
}

/// Walks back from `sink` and returns its hops, sink side first.
pub fn trigger_chain(lab: &Laboratory, sink: &ObjectPath) -> Result<Vec<TriggerLink>> {
    let mut chain: Vec<TriggerLink> = Vec::new();
    let mut input_path = lab.trigger_input_path(sink)?;
    loop {
        let input = lab.trigger_input(&input_path)?;
        let source = match input.source() {
            Some(source) => source.clone(),
            None => break,
        };
        if chain.iter().any(|link| link.source == source) {
            return Err(TimingError::CyclicTriggerDependency {
                device: source.root_name().to_string(),
            });
        }
        chain.push(TriggerLink {
            source: source.clone(),
            polarity: input.edge(),
        });
        match lab.hal(source.root_name())?.governing_input(&source) {
            Some(next) => input_path = next,
            None => break,
        }
    }
    log::debug!(
        "Trigger chain of {}: {}",
        sink,
        chain
            .iter()
            .map(|link| format!("{} ({})", link.source, link.polarity))
            .collect::<Vec<_>>()
            .join(" <- ")
    );
    Ok(chain)
}

/// Global edge times, gated intervals of the last hop and the trigger chain of `sink`.
///
/// A sink without a source has no edges at all.
pub fn resolve(lab: &Laboratory, sink: &ObjectPath) -> Result<ResolvedTrigger> {
    let chain = trigger_chain(lab, sink)?;
    if chain.is_empty() {
        return Ok(ResolvedTrigger::empty());
    }
    let mut edges: Array1<f64> = array![0.0];
    let mut gated: Array2<f64> = Array2::zeros((0, 2));
    for link in chain.iter().rev() {
        let local = lab
            .trigger_output(&link.source)?
            .get_trigger_times(link.polarity)?;
        gated = translate_intervals(&edges, &local.gated);
        edges = translate_times(&edges, &local.edges);
    }
    Ok(ResolvedTrigger {
        edges,
        gated,
        chain,
    })
}
