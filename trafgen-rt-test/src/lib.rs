pub mod driver;
pub mod packet;

pub mod util {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};

    use trafgen_rt::api::rte::eal::Environment;
    use trafgen_rt::api::rte::pktmbuf::{MemPool, MemPoolConfig};
    use trafgen_rt::soft::SoftEnv;

    pub const TEST_MBUF_COUNT: u32 = 1024;
    pub const TEST_MBUF_CACHE_SIZE: u32 = 32;

    /// Route `tracing` output through the test harness, once per process.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    /// An initialized, unpinned software environment.
    ///
    /// `extra` is appended to the program name, e.g. `["--lcores=0@(0),1@(0)"]`.
    pub fn soft_env(extra: &[&str]) -> SoftEnv {
        init_tracing();
        let env = SoftEnv::new().pin_threads(false);
        let mut args = vec!["trafgen-test".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        env.init(&args).expect("Failed to initialize environment");
        env
    }

    /// A small standard-size pool.
    pub fn test_pool(env: &SoftEnv, name: &str) -> MemPool {
        let conf = MemPoolConfig::new()
            .num_mbufs(TEST_MBUF_COUNT)
            .cache_size(TEST_MBUF_CACHE_SIZE);
        MemPool::create(env, name, &conf).expect("Failed to create pool")
    }

    /// A writer whose output can be read back after it is moved into a sink.
    #[derive(Clone, Default)]
    pub struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }

        pub fn lines(&self) -> Vec<String> {
            self.text().lines().map(str::to_string).collect()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
