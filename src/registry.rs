use crate::device_token::DeviceToken;
use crate::error::RegistryError;

/// A capability provider loaded into the server
pub trait Plugin: Send {
    fn name(&self) -> &str;

    /// Look for hardware; returns tokens for newly found devices
    fn hardware_detect(&mut self) -> Result<Vec<DeviceToken>, RegistryError>;

    /// Periodic housekeeping from the server loop
    fn update(&mut self) -> Result<(), RegistryError> {
        Ok(())
    }

    fn shutdown(&mut self) {}
}

struct Entry {
    name: String,
    plugin: Box<dyn Plugin>,
    failures: u32,
    shut_down: bool,
}

/// Process-lifetime set of plugins, owned by the server run loop.
///
/// Plugins are driven in registration order and shut down in reverse.
#[derive(Default)]
pub struct PluginRegistry {
    entries: Vec<Entry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<(), RegistryError> {
        let name = plugin.name().to_string();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(RegistryError::DuplicatePlugin(name));
        }
        log::info!("[REGISTRY] Registered plugin {}", name);
        self.entries.push(Entry {
            name,
            plugin,
            failures: 0,
            shut_down: false,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Run hardware detection on every plugin. A failing plugin is logged
    /// and skipped.
    pub fn detect_all(&mut self) -> Vec<DeviceToken> {
        let mut tokens = Vec::new();
        for entry in &mut self.entries {
            match entry.plugin.hardware_detect() {
                Ok(found) => {
                    if !found.is_empty() {
                        log::info!(
                            "[REGISTRY] {} detected {} device(s)",
                            entry.name,
                            found.len()
                        );
                    }
                    tokens.extend(found);
                }
                Err(e) => {
                    entry.failures += 1;
                    log::warn!("[REGISTRY] Hardware detection failed: {}", e);
                }
            }
        }
        tokens
    }

    /// Update every plugin; returns the errors of those that failed
    pub fn update_all(&mut self) -> Vec<RegistryError> {
        let mut errors = Vec::new();
        for entry in &mut self.entries {
            if let Err(e) = entry.plugin.update() {
                entry.failures += 1;
                errors.push(e);
            }
        }
        errors
    }

    /// Failure count for one plugin
    pub fn failures(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.failures)
    }

    pub fn status_report(&self) -> String {
        self.entries
            .iter()
            .map(|e| match e.failures {
                0 => format!("{}: OK", e.name),
                n => format!("{}: {} failure(s)", e.name, n),
            })
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Shut plugins down in reverse registration order. Each plugin is
    /// shut down at most once.
    pub fn teardown(&mut self) {
        for entry in self.entries.iter_mut().rev().filter(|e| !e.shut_down) {
            log::info!("[REGISTRY] Shutting down plugin {}", entry.name);
            entry.plugin.shutdown();
            entry.shut_down = true;
        }
    }
}

impl Drop for PluginRegistry {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_detect: bool,
    }

    impl Recorder {
        fn boxed(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn Plugin> {
            Box::new(Recorder {
                name: name.to_string(),
                log: Arc::clone(log),
                fail_detect: false,
            })
        }
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn hardware_detect(&mut self) -> Result<Vec<DeviceToken>, RegistryError> {
            self.log.lock().push(format!("detect {}", self.name));
            if self.fail_detect {
                return Err(RegistryError::PluginFailed {
                    name: self.name.clone(),
                    reason: "no usb".to_string(),
                });
            }
            Ok(vec![DeviceToken::spawn(&self.name, 1, || None)])
        }

        fn update(&mut self) -> Result<(), RegistryError> {
            self.log.lock().push(format!("update {}", self.name));
            Ok(())
        }

        fn shutdown(&mut self) {
            self.log.lock().push(format!("shutdown {}", self.name));
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Recorder::boxed("camera", &log)).unwrap();
        assert_eq!(
            registry.register(Recorder::boxed("camera", &log)),
            Err(RegistryError::DuplicatePlugin("camera".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_order_and_reverse_teardown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(Recorder::boxed(name, &log)).unwrap();
        }
        assert_eq!(registry.names(), vec!["a", "b", "c"]);
        assert_eq!(registry.detect_all().len(), 3);
        assert!(registry.update_all().is_empty());
        registry.teardown();
        registry.teardown();
        drop(registry);

        let log = log.lock();
        assert_eq!(
            *log,
            vec![
                "detect a", "detect b", "detect c", "update a", "update b", "update c",
                "shutdown c", "shutdown b", "shutdown a",
            ]
        );
    }

    #[test]
    fn test_failed_detection_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry
            .register(Box::new(Recorder {
                name: "broken".to_string(),
                log: Arc::clone(&log),
                fail_detect: true,
            }))
            .unwrap();
        registry.register(Recorder::boxed("ok", &log)).unwrap();
        let tokens = registry.detect_all();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name(), "ok");
        assert_eq!(registry.failures("broken"), Some(1));
        assert_eq!(registry.failures("ok"), Some(0));
        assert_eq!(registry.status_report(), "broken: 1 failure(s) | ok: OK");
    }

    #[test]
    fn test_late_registration_shuts_down_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(Recorder::boxed("a", &log)).unwrap();
        registry.teardown();
        registry.register(Recorder::boxed("b", &log)).unwrap();
        registry.teardown();
        drop(registry);
        assert_eq!(*log.lock(), vec!["shutdown a", "shutdown b"]);
    }

    #[test]
    fn test_drop_tears_down() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut registry = PluginRegistry::new();
            registry.register(Recorder::boxed("x", &log)).unwrap();
        }
        assert_eq!(*log.lock(), vec!["shutdown x"]);
    }
}
