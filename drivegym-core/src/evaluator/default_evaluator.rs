//! Default implementation of the [`Evaluator`] trait.
use super::Evaluator;
use crate::{
    error::CoreError,
    record::{Record, RecordValue},
    Env, Policy,
};
use anyhow::Result;
use log::info;

/// Runs a fixed number of episodes and reports the average return.
///
/// Episode `ix` starts with [`Env::reset_with_index`]`(ix)`, so two evaluations of the
/// same policy on environments built with the same configuration see the same
/// sequence of initial states.
///
/// The returned [`Record`] holds:
/// * `Episode return` - mean of the undiscounted returns,
/// * `Episode length` - mean number of [`Env::step`] calls per episode,
/// * `Episode returns` - return of every episode.
pub struct DefaultEvaluator<E: Env> {
    /// The number of episodes to run during evaluation.
    n_episodes: usize,

    /// The environment instance used for evaluation.
    env: E,
}

impl<E: Env> Evaluator<E> for DefaultEvaluator<E> {
    fn evaluate<P>(&mut self, policy: &mut P) -> Result<Record>
    where
        P: Policy<E>,
    {
        let mut returns = Vec::with_capacity(self.n_episodes);
        let mut total_steps = 0usize;

        for ix in 0..self.n_episodes {
            let mut prev_obs = self.env.reset_with_index(ix)?;
            policy.reset();
            let mut r_sum = 0f64;

            loop {
                let act = policy.sample(&prev_obs);
                let (step, _) = self.env.step(&act)?;
                r_sum += step.reward;
                total_steps += 1;
                if step.is_done() {
                    break;
                }
                prev_obs = step.obs;
            }

            info!("Episode {}: return = {:.3}", ix, r_sum);
            returns.push(r_sum);
        }

        let n = self.n_episodes as f64;
        let mean = returns.iter().sum::<f64>() / n;
        Ok(Record::from_slice(&[
            ("Episode return", RecordValue::Scalar(mean)),
            ("Episode length", RecordValue::Scalar(total_steps as f64 / n)),
            ("Episode returns", RecordValue::Array1(returns)),
        ]))
    }
}

impl<E: Env> DefaultEvaluator<E> {
    /// Builds the environment from `config` and `seed` and wraps it in an evaluator.
    pub fn new(config: &E::Config, seed: i64, n_episodes: usize) -> Result<Self> {
        Self::with_env(E::build(config, seed)?, n_episodes)
    }

    /// Wraps an already built environment.
    pub fn with_env(env: E, n_episodes: usize) -> Result<Self> {
        if n_episodes == 0 {
            return Err(CoreError::NoEvaluationEpisode.into());
        }
        Ok(Self { n_episodes, env })
    }

    /// Returns the environment, e.g., to inspect it after evaluation.
    pub fn env(&self) -> &E {
        &self.env
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Act, ActionSpace, Obs, ObservationSpace, Step};

    #[derive(Clone, Debug)]
    struct CountObs(usize);

    impl Obs for CountObs {
        fn len(&self) -> usize {
            1
        }
    }

    #[derive(Clone, Debug)]
    struct UnitAct;

    impl Act for UnitAct {
        fn len(&self) -> usize {
            1
        }
    }

    /// Ends every episode after `ix + 1` steps, paying 1 per step.
    struct CountdownEnv {
        remaining: usize,
    }

    impl Env for CountdownEnv {
        type Config = ();
        type Obs = CountObs;
        type Act = UnitAct;
        type Info = ();

        fn build(_config: &Self::Config, _seed: i64) -> Result<Self> {
            Ok(Self { remaining: 0 })
        }

        fn step(&mut self, a: &Self::Act) -> Result<(Step<Self>, Record)> {
            self.remaining -= 1;
            let done = self.remaining == 0;
            let step = Step::new(CountObs(self.remaining), a.clone(), 1.0, false, done, ());
            Ok((step, Record::empty()))
        }

        fn reset(&mut self) -> Result<Self::Obs> {
            self.reset_with_index(0)
        }

        fn reset_with_index(&mut self, ix: usize) -> Result<Self::Obs> {
            self.remaining = ix + 1;
            Ok(CountObs(self.remaining))
        }

        fn action_space(&self) -> ActionSpace {
            ActionSpace::MultiDiscrete(vec![1])
        }

        fn observation_space(&self) -> ObservationSpace {
            ObservationSpace::image(1, 1, 1)
        }
    }

    struct ConstPolicy {
        resets: usize,
    }

    impl Policy<CountdownEnv> for ConstPolicy {
        fn sample(&mut self, _obs: &CountObs) -> UnitAct {
            UnitAct
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn test_mean_return() -> Result<()> {
        let mut evaluator = DefaultEvaluator::<CountdownEnv>::new(&(), 0, 3)?;
        let mut policy = ConstPolicy { resets: 0 };
        let record = evaluator.evaluate(&mut policy)?;

        // Episodes last 1, 2 and 3 steps.
        assert_eq!(record.get_scalar("Episode return")?, 2.0);
        assert_eq!(record.get_scalar("Episode length")?, 2.0);
        assert_eq!(record.get_array1("Episode returns")?, vec![1.0, 2.0, 3.0]);
        assert_eq!(policy.resets, 3);
        Ok(())
    }

    #[test]
    fn test_zero_episodes_rejected() {
        assert!(DefaultEvaluator::<CountdownEnv>::new(&(), 0, 0).is_err());
    }
}
