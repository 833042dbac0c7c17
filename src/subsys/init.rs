//! Dependency-ordered subsystem bring-up/teardown (spec §2 row J).
//! Grounded on the teacher's `subsys::registration`/`subsys::config`
//! subsystems and the `spdk_subsystem_init_next`/`spdk_subsystem_fini_next`
//! chaining they drive, reworked from the SPDK `spdk_add_subsystem` FFI
//! registry into a plain topologically-sorted `Vec<Box<dyn Subsystem>>`,
//! since there is no SPDK application runtime to register against here.

use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum InitError {
    #[snafu(display("subsystem {} depends on unregistered subsystem {}", name, depends_on))]
    UnknownDependency { name: String, depends_on: String },
    #[snafu(display("subsystem dependency graph has a cycle involving {}", name))]
    Cycle { name: String },
}

/// One bring-up/teardown unit (spec §2 row J). `init`/`fini` mirror the
/// teacher's `extern "C" fn init()`/`fini()` pair but run synchronously and
/// return a `Result` rather than chaining to the next SPDK subsystem
/// themselves — the registry does that chaining.
pub trait Subsystem {
    fn name(&self) -> &str;

    /// Names of subsystems that must already be initialized before this
    /// one starts (spec's "dependency-ordered" requirement).
    fn depends_on(&self) -> &[&str] {
        &[]
    }

    fn init(&mut self) -> Result<(), InitError>;

    /// Torn down in strict reverse init order, mirroring the admin-queue
    /// cascade-teardown discipline the NVMf connection state machine uses
    /// (spec §4.H): everything that depended on this subsystem has already
    /// been finalized by the time this runs.
    fn fini(&mut self);
}

/// Holds every registered subsystem and the order `init`/`fini` ran in.
pub struct SubsystemRegistry {
    subsystems: Vec<Box<dyn Subsystem>>,
    /// Indices into `subsystems` in dependency order, populated by
    /// [`SubsystemRegistry::init_all`].
    order: Vec<usize>,
}

impl Default for SubsystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self {
            subsystems: Vec::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, subsystem: Box<dyn Subsystem>) {
        self.subsystems.push(subsystem);
    }

    fn topo_order(&self) -> Result<Vec<usize>, InitError> {
        let index_of = |name: &str| self.subsystems.iter().position(|s| s.name() == name);

        let mut visited = vec![0u8; self.subsystems.len()]; // 0 = unvisited, 1 = visiting, 2 = done
        let mut order = Vec::with_capacity(self.subsystems.len());

        fn visit(
            subsystems: &[Box<dyn Subsystem>],
            index_of: &dyn Fn(&str) -> Option<usize>,
            visited: &mut [u8],
            order: &mut Vec<usize>,
            i: usize,
        ) -> Result<(), InitError> {
            match visited[i] {
                2 => return Ok(()),
                1 => {
                    return Err(InitError::Cycle {
                        name: subsystems[i].name().to_string(),
                    })
                }
                _ => {}
            }
            visited[i] = 1;
            for dep in subsystems[i].depends_on() {
                let dep_idx = index_of(dep).ok_or_else(|| InitError::UnknownDependency {
                    name: subsystems[i].name().to_string(),
                    depends_on: dep.to_string(),
                })?;
                visit(subsystems, index_of, visited, order, dep_idx)?;
            }
            visited[i] = 2;
            order.push(i);
            Ok(())
        }

        for i in 0 .. self.subsystems.len() {
            visit(&self.subsystems, &index_of, &mut visited, &mut order, i)?;
        }
        Ok(order)
    }

    /// Initialize every registered subsystem in dependency order. On the
    /// first failure, every already-initialized subsystem is torn down in
    /// reverse order before the error is returned — mirroring the cascade
    /// teardown the NVMf connection state machine performs on admin-queue
    /// destruction (spec §4.H), applied here at subsystem granularity.
    pub fn init_all(&mut self) -> Result<(), InitError> {
        let order = self.topo_order()?;
        for (done, &i) in order.iter().enumerate() {
            if let Err(e) = self.subsystems[i].init() {
                for &j in order[.. done].iter().rev() {
                    self.subsystems[j].fini();
                }
                return Err(e);
            }
        }
        self.order = order;
        Ok(())
    }

    /// Tear down every subsystem that was successfully initialized, in
    /// strict reverse bring-up order.
    pub fn fini_all(&mut self) {
        for &i in self.order.iter().rev() {
            self.subsystems[i].fini();
        }
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording {
        name: &'static str,
        deps: &'static [&'static str],
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    impl Subsystem for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn depends_on(&self) -> &[&str] {
            self.deps
        }

        fn init(&mut self) -> Result<(), InitError> {
            if self.fail_init {
                return Err(InitError::Cycle {
                    name: self.name.to_string(),
                });
            }
            self.log.lock().unwrap().push(format!("init:{}", self.name));
            Ok(())
        }

        fn fini(&mut self) {
            self.log.lock().unwrap().push(format!("fini:{}", self.name));
        }
    }

    #[test]
    fn dependencies_initialize_before_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Recording { name: "config", deps: &[], log: log.clone(), fail_init: false }));
        reg.register(Box::new(Recording { name: "nvmf", deps: &["config"], log: log.clone(), fail_init: false }));
        reg.register(Box::new(Recording { name: "registration", deps: &["nvmf", "config"], log: log.clone(), fail_init: false }));

        reg.init_all().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["init:config", "init:nvmf", "init:registration"]);
    }

    #[test]
    fn fini_runs_in_strict_reverse_of_init() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Recording { name: "a", deps: &[], log: log.clone(), fail_init: false }));
        reg.register(Box::new(Recording { name: "b", deps: &["a"], log: log.clone(), fail_init: false }));

        reg.init_all().unwrap();
        log.lock().unwrap().clear();
        reg.fini_all();
        assert_eq!(*log.lock().unwrap(), vec!["fini:b", "fini:a"]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Recording { name: "nvmf", deps: &["config"], log, fail_init: false }));
        assert!(matches!(reg.init_all(), Err(InitError::UnknownDependency { .. })));
    }

    #[test]
    fn failed_init_tears_down_already_started_subsystems() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut reg = SubsystemRegistry::new();
        reg.register(Box::new(Recording { name: "a", deps: &[], log: log.clone(), fail_init: false }));
        reg.register(Box::new(Recording { name: "b", deps: &["a"], log: log.clone(), fail_init: true }));

        assert!(reg.init_all().is_err());
        assert_eq!(*log.lock().unwrap(), vec!["init:a", "fini:a"]);
    }
}
