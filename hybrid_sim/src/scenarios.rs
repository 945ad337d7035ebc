//! Scenario definitions.
//!
//! Each scenario is a hybrid factor graph, the elimination blocks that solve
//! it (continuous blocks first, then one block per discrete key) and the truth
//! it was sampled from. All scenarios are deterministic given the same seed.

use hybrid_core::{
    discrete::DecisionTreeFactor,
    error::Result,
    gaussian::{GaussianFactor, JacobianFactor, VectorValues},
    graph::HybridFactorGraph,
    mixture::MixtureFactor,
    types::{symbol, Assignment, DVec, DiscreteKey, DiscreteKeys, Key},
};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One scalar state, 8 readings, each reading may come from a faulty sensor
    Switching,
    /// 2 planar landmarks, 6 point measurements of unknown origin
    DataAssociation,
    /// 6-step 1-D trajectory, each step either stands still or moves by +1
    ModeChain,
}

/// Values the scenario was generated from.
#[derive(Clone, Debug, Default)]
pub struct ScenarioTruth {
    pub modes: Assignment,
    pub continuous: VectorValues,
}

/// A fully built scenario.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub graph: HybridFactorGraph,
    /// Elimination blocks in order: continuous first.
    pub blocks: Vec<Vec<Key>>,
    pub truth: ScenarioTruth,
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Result<Self> {
        match kind {
            ScenarioKind::Switching => Self::switching(seed),
            ScenarioKind::DataAssociation => Self::data_association(seed),
            ScenarioKind::ModeChain => Self::mode_chain(seed),
        }
    }

    // -----------------------------------------------------------------------
    // Scenario 1: Switching (sensor fault detection)
    // -----------------------------------------------------------------------
    fn switching(seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(1));
        const READINGS: u64 = 8;
        const NOMINAL_SIGMA: f64 = 0.1;
        const FAULT_SIGMA: f64 = 10.0;

        let x = symbol('x', 0);
        let x_true = rng.gen::<f64>() * 10.0 - 5.0;
        let faulty: Vec<u64> = (0..2).map(|_| rng.gen_range(0..READINGS)).collect();

        let mut graph = HybridFactorGraph::new();
        let mut truth = ScenarioTruth::default();
        truth.continuous.insert(x, scalar(x_true));

        for i in 0..READINGS {
            let f = DiscreteKey::new(symbol('f', i), 2);
            let is_faulty = faulty.contains(&i);
            let z = if is_faulty {
                let magnitude = 3.0 + rng.gen::<f64>() * 3.0;
                x_true + if rng.gen_bool(0.5) { magnitude } else { -magnitude }
            } else {
                x_true + uniform(&mut rng, 0.03)
            };
            graph.push(MixtureFactor::from_components(
                vec![x],
                f,
                vec![
                    prior(x, z, NOMINAL_SIGMA)?,
                    prior(x, z, FAULT_SIGMA)?,
                ],
            )?);
            graph.push(mode_prior(f, vec![0.9, 0.1])?);
            truth.modes.insert(f.key, usize::from(is_faulty));
        }

        let mut blocks = vec![vec![x]];
        blocks.extend((0..READINGS).map(|i| vec![symbol('f', i)]));

        Ok(Scenario {
            name: "switching".into(),
            seed,
            graph,
            blocks,
            truth,
        })
    }

    // -----------------------------------------------------------------------
    // Scenario 2: Data association
    // -----------------------------------------------------------------------
    fn data_association(seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(2));
        const MEASUREMENTS: u64 = 6;
        const MEAS_SIGMA: f64 = 0.2;
        const PRIOR_SIGMA: f64 = 5.0;

        let landmarks = [symbol('l', 0), symbol('l', 1)];
        let positions = [
            DVec::from_column_slice(&[uniform(&mut rng, 1.0), uniform(&mut rng, 1.0)]),
            DVec::from_column_slice(&[10.0 + uniform(&mut rng, 1.0), 5.0 + uniform(&mut rng, 1.0)]),
        ];

        let mut graph = HybridFactorGraph::new();
        let mut truth = ScenarioTruth::default();
        for (key, pos) in landmarks.iter().zip(&positions) {
            truth.continuous.insert(*key, pos.clone());
            let rough = pos.map(|c| c + uniform(&mut rng, 1.0));
            graph.push(JacobianFactor::prior(*key, rough, PRIOR_SIGMA)?);
        }

        for j in 0..MEASUREMENTS {
            let a = DiscreteKey::new(symbol('a', j), landmarks.len());
            // every landmark is seen at least once
            let source = if (j as usize) < landmarks.len() {
                j as usize
            } else {
                rng.gen_range(0..landmarks.len())
            };
            let z = positions[source].map(|c| c + uniform(&mut rng, 0.1));
            let components = landmarks
                .iter()
                .map(|l| JacobianFactor::prior(*l, z.clone(), MEAS_SIGMA).map(GaussianFactor::from))
                .collect::<Result<Vec<_>>>()?;
            graph.push(MixtureFactor::from_components(landmarks.to_vec(), a, components)?);
            graph.push(mode_prior(a, vec![0.5, 0.5])?);
            truth.modes.insert(a.key, source);
        }

        let mut blocks = vec![landmarks.to_vec()];
        blocks.extend((0..MEASUREMENTS).map(|j| vec![symbol('a', j)]));

        Ok(Scenario {
            name: "data_association".into(),
            seed,
            graph,
            blocks,
            truth,
        })
    }

    // -----------------------------------------------------------------------
    // Scenario 3: Mode chain (switching odometry)
    // -----------------------------------------------------------------------
    fn mode_chain(seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(3));
        const STEPS: u64 = 6;
        const GPS_SIGMA: f64 = 0.1;
        const ODOM_SIGMA: f64 = 0.1;

        let mut graph = HybridFactorGraph::new();
        let mut truth = ScenarioTruth::default();
        let mut position = 0.0;

        for k in 0..STEPS {
            let x = symbol('x', k);
            if k > 0 {
                let m = DiscreteKey::new(symbol('m', k - 1), 2);
                let moving = rng.gen_bool(0.5);
                position += if moving { 1.0 } else { 0.0 };
                let prev = symbol('x', k - 1);
                graph.push(MixtureFactor::from_components(
                    vec![prev, x],
                    m,
                    vec![
                        JacobianFactor::between(prev, x, scalar(0.0), ODOM_SIGMA)?.into(),
                        JacobianFactor::between(prev, x, scalar(1.0), ODOM_SIGMA)?.into(),
                    ],
                )?);
                graph.push(mode_prior(m, vec![0.5, 0.5])?);
                truth.modes.insert(m.key, usize::from(moving));
            }
            let gps = position + uniform(&mut rng, 0.05);
            graph.push(JacobianFactor::prior(x, scalar(gps), GPS_SIGMA)?);
            truth.continuous.insert(x, scalar(position));
        }

        let mut blocks: Vec<Vec<Key>> = (0..STEPS).map(|k| vec![symbol('x', k)]).collect();
        blocks.extend((0..STEPS - 1).map(|k| vec![symbol('m', k)]));

        Ok(Scenario {
            name: "mode_chain".into(),
            seed,
            graph,
            blocks,
            truth,
        })
    }
}

// ---------------------------------------------------------------------------
// Builder helpers
// ---------------------------------------------------------------------------

/// Uniform noise in `[-amplitude, amplitude]`.
fn uniform(rng: &mut ChaCha8Rng, amplitude: f64) -> f64 {
    rng.gen::<f64>() * amplitude * 2.0 - amplitude
}

fn scalar(value: f64) -> DVec {
    DVec::from_element(1, value)
}

fn prior(key: Key, value: f64, sigma: f64) -> Result<GaussianFactor> {
    Ok(JacobianFactor::prior(key, scalar(value), sigma)?.into())
}

fn mode_prior(key: DiscreteKey, probabilities: Vec<f64>) -> Result<DecisionTreeFactor> {
    DecisionTreeFactor::from_values(DiscreteKeys::from_keys([key])?, probabilities)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use clap::ValueEnum;
    use hybrid_core::{
        bayes_net::eliminate_sequential,
        eliminate::{EliminationConfig, HybridEliminator},
    };

    fn solve(scenario: &Scenario) -> hybrid_core::bayes_net::HybridValues {
        let eliminator = HybridEliminator::new(EliminationConfig::default());
        let (net, _) = eliminate_sequential(&scenario.graph, &scenario.blocks, &eliminator).unwrap();
        assert_eq!(net.len(), scenario.blocks.len());
        net.optimize().unwrap()
    }

    #[test]
    fn same_seed_same_scenario() {
        for kind in ScenarioKind::value_variants() {
            let a = Scenario::build(*kind, 7).unwrap();
            let b = Scenario::build(*kind, 7).unwrap();
            assert_eq!(a.truth.modes, b.truth.modes);
            assert_eq!(a.graph.len(), b.graph.len());
        }
    }

    #[test]
    fn every_scenario_recovers_its_modes() {
        for kind in ScenarioKind::value_variants() {
            for seed in [1, 42, 1234] {
                let scenario = Scenario::build(*kind, seed).unwrap();
                let values = solve(&scenario);
                assert_eq!(
                    values.discrete, scenario.truth.modes,
                    "{} seed {seed}",
                    scenario.name
                );
            }
        }
    }

    #[test]
    fn mode_chain_positions_follow_the_truth() {
        let scenario = Scenario::build(ScenarioKind::ModeChain, 42).unwrap();
        let values = solve(&scenario);
        for (key, expected) in scenario.truth.continuous.iter() {
            assert_abs_diff_eq!(values.continuous.get(key).unwrap()[0], expected[0], epsilon = 0.1);
        }
    }

    #[test]
    fn landmarks_land_near_their_truth() {
        let scenario = Scenario::build(ScenarioKind::DataAssociation, 42).unwrap();
        let values = solve(&scenario);
        for (key, expected) in scenario.truth.continuous.iter() {
            let estimate = values.continuous.get(key).unwrap();
            assert!((estimate - expected).norm() < 0.5, "landmark {key}");
        }
    }
}
