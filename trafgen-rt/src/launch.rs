//! Multi-core launcher.
//!
//! Runs one entry routine on every lcore: workers first, then the main lcore
//! on the calling thread, then waits for every worker.

use std::sync::Arc;

use tracing::{debug, info};

use crate::api::rte::eal::Environment;
use crate::api::rte::lcore::Lcore;
use crate::error::Error;

/// Return values of one launch, in lcore id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchReport {
    results: Vec<(Lcore, i32)>,
}

impl LaunchReport {
    pub fn results(&self) -> &[(Lcore, i32)] {
        &self.results
    }

    /// Return value of `lcore`, if it ran.
    pub fn get(&self, lcore: Lcore) -> Option<i32> {
        self.results
            .iter()
            .find(|(l, _)| *l == lcore)
            .map(|(_, ret)| *ret)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether every lcore returned 0.
    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|(_, ret)| *ret == 0)
    }
}

/// Run `entry` on every lcore with the same context.
///
/// Workers are dispatched before the main lcore starts its own call, and this
/// returns only after every call has returned. An entry that never returns
/// blocks this forever; stopping the loops is up to the caller.
///
/// If a worker cannot be dispatched, the workers already running are waited
/// for, the main lcore is not run, and the error is returned.
pub fn run<T, F>(env: &dyn Environment, entry: F, ctx: Arc<T>) -> Result<LaunchReport, Error>
where
    T: Send + Sync + 'static,
    F: Fn(Lcore, &T) -> i32 + Send + Sync + 'static,
{
    let entry = Arc::new(entry);
    let main = env.main_lcore();
    let lcores = env.lcores();
    let mut launched = Vec::with_capacity(lcores.len());

    for &lcore in lcores.iter().filter(|l| **l != main) {
        let entry = entry.clone();
        let ctx = ctx.clone();
        let dispatched = env.remote_launch(lcore, Box::new(move || entry(lcore, &ctx)));
        if let Err(source) = dispatched {
            tracing::error!(%lcore, error = %source, "Failed to launch on worker lcore");
            for &worker in &launched {
                env.wait_lcore(worker);
            }
            return Err(Error::Launch { lcore, source });
        }
        debug!(%lcore, "Dispatched");
        launched.push(lcore);
    }

    info!(workers = launched.len(), %main, "Running entry on main lcore");
    let mut results = Vec::with_capacity(launched.len() + 1);
    results.push((main, entry(main, &ctx)));

    for worker in launched {
        results.push((worker, env.wait_lcore(worker)));
    }
    results.sort_by_key(|(lcore, _)| *lcore);

    info!("All lcores finished");
    Ok(LaunchReport { results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftEnv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_single_lcore_runs_inline() {
        let env = SoftEnv::new().pin_threads(false);
        env.init(&["t".to_string()]).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let report = run(
            &env,
            |lcore, calls: &AtomicUsize| {
                calls.fetch_add(1, Ordering::SeqCst);
                lcore.id() as i32
            },
            calls.clone(),
        )
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.results(), &[(Lcore::new(0), 0)]);
        assert!(report.all_ok());
        env.cleanup().unwrap();
    }

    #[test]
    fn test_report_order_and_values() {
        let env = SoftEnv::new().pin_threads(false);
        env.init(&["t".to_string(), "--lcores=0@(0),3@(0),1@(0)".to_string()])
            .unwrap();

        let report = run(&env, |lcore, base: &i32| base + lcore.id() as i32, Arc::new(10)).unwrap();
        assert_eq!(
            report.results(),
            &[(Lcore::new(0), 10), (Lcore::new(1), 11), (Lcore::new(3), 13)]
        );
        assert_eq!(report.get(Lcore::new(3)), Some(13));
        assert_eq!(report.get(Lcore::new(2)), None);
        assert!(!report.all_ok());
        env.cleanup().unwrap();
    }
}
