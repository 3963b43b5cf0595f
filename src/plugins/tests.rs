// 插件系统集成测试

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use plugin_sandbox_common::{Device, ErrorKind};
use serde_json::json;
use tracing_subscriber::fmt::MakeWriter;

use super::testing::{CountingPlugin, FaultMode, FaultyPlugin, OcrPlugin};
use super::*;
use crate::config::HostConfig;

/// 收集日志输出
#[derive(Clone, Default)]
struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl BufferWriter {
    fn contents(&self) -> String {
        let buffer = self.0.lock().unwrap();
        String::from_utf8_lossy(&buffer).to_string()
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn manager_without_accelerator() -> PluginManager {
    PluginManager::with_probe(RegistryConfig::default(), Arc::new(StaticProbe::new()))
}

/// ocr 可用；tracker 需要加速设备，构造和调用都会计数
async fn setup_ocr_and_tracker(manager: &PluginManager) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let constructed = Arc::new(AtomicUsize::new(0));
    let tracker = CountingPlugin::new();
    let calls = tracker.counter();

    manager
        .register_fn("ocr", |_| Ok(Arc::new(OcrPlugin) as Arc<dyn Plugin>))
        .await;
    let counter = constructed.clone();
    manager
        .register_fn("tracker", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(tracker.clone()) as Arc<dyn Plugin>)
        })
        .await;

    let summary = manager
        .load_all(&[
            PluginManifest::new("ocr", "文字识别", "1.0.0"),
            PluginManifest::new("tracker", "目标跟踪", "1.0.0").requiring_accelerator(),
        ])
        .await;
    assert_eq!(summary.loaded, vec!["ocr".to_string()]);
    assert_eq!(summary.unavailable, vec!["tracker".to_string()]);

    (constructed, calls)
}

#[tokio::test]
async fn test_unavailable_plugin_is_never_invoked() {
    let manager = manager_without_accelerator();
    let (constructed, calls) = setup_ocr_and_tracker(&manager).await;

    assert!(manager.registry().is_available("ocr").await);

    let status = manager.get_status("tracker").await.unwrap();
    assert_eq!(status.state, PluginState::Unavailable);
    assert!(status.reason.as_deref().unwrap().contains("accelerator"));

    let outcome = manager
        .execute("tracker", "track", json!({"frame": 1}), Device::Accelerated)
        .await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_kind, Some(ErrorKind::PluginUnavailable));
    assert!(outcome.error_message.unwrap().contains("accelerator"));

    assert_eq!(constructed.load(Ordering::SeqCst), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let status = manager.get_status("tracker").await.unwrap();
    assert_eq!(status.success_count, 0);
    assert_eq!(status.error_count, 0);
}

#[tokio::test]
async fn test_accelerated_request_falls_back_with_log() {
    let buffer = BufferWriter::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let manager = manager_without_accelerator();
    setup_ocr_and_tracker(&manager).await;

    let outcome = manager
        .execute("ocr", "extract", json!({"image": "scan.png"}), Device::Accelerated)
        .await;

    assert!(outcome.ok);
    let decision = outcome.device.unwrap();
    assert_eq!(decision.requested, Device::Accelerated);
    assert_eq!(decision.used, Device::Baseline);
    assert!(decision.fallback_occurred);
    assert_eq!(outcome.value.unwrap()["device"], json!("baseline"));

    let record = manager.registry().get_status("ocr").await.unwrap();
    assert_eq!(record.fallback_count, 1);
    assert_eq!(record.last_device, Some(Device::Baseline));

    let logs = buffer.contents();
    assert!(logs.contains("降级"));
    assert!(logs.contains("ocr"));
}

#[tokio::test]
async fn test_device_fault_is_not_retried() {
    let manager = PluginManager::with_probe(
        RegistryConfig::default(),
        Arc::new(StaticProbe::new().with_accelerator(true)),
    );
    manager
        .register_fn("segmenter", |_| {
            Ok(Arc::new(FaultyPlugin::new(FaultMode::AcceleratedOnly)) as Arc<dyn Plugin>)
        })
        .await;
    assert!(manager.load(&PluginManifest::new("segmenter", "", "1.0.0")).await);

    let outcome = manager
        .execute("segmenter", "segment", json!({}), Device::Accelerated)
        .await;
    assert!(!outcome.ok);
    assert_eq!(outcome.error_kind, Some(ErrorKind::DeviceUnavailable));
    assert_eq!(outcome.device_used(), Some(Device::Accelerated));

    let record = manager.registry().get_status("segmenter").await.unwrap();
    assert_eq!(record.fallback_count, 0);
    assert_eq!(record.error_count, 1);
    assert_eq!(record.success_count, 0);
}

#[tokio::test]
async fn test_average_covers_recent_executions_only() {
    let manager = manager_without_accelerator();
    let plugin = CountingPlugin::new();
    let instance = plugin.clone();
    manager
        .register_fn("counter", move |_| Ok(Arc::new(instance.clone()) as Arc<dyn Plugin>))
        .await;
    assert!(manager.load(&PluginManifest::new("counter", "", "1.0.0")).await);

    for i in 0..15 {
        let outcome = manager
            .execute("counter", "count", json!({"i": i}), Device::Baseline)
            .await;
        assert!(outcome.ok);
    }

    assert_eq!(plugin.calls(), 15);
    let record = manager.registry().get_status("counter").await.unwrap();
    assert_eq!(record.success_count, 15);
    assert_eq!(record.recent_execution_times.len(), 10);

    let expected = record.recent_execution_times.iter().sum::<f64>() / 10.0;
    let health = manager.get_status("counter").await.unwrap();
    assert_eq!(health.avg_execution_time_ms, Some(expected));
    assert_eq!(
        health.last_execution_time_ms,
        record.recent_execution_times.last().copied()
    );
}

#[tokio::test]
async fn test_every_fault_becomes_structured_result() {
    let manager = manager_without_accelerator();
    let modes = vec![
        ("runtime", FaultMode::Runtime("shape mismatch".to_string())),
        (
            "dependency",
            FaultMode::Kind(ErrorKind::DependencyMissing, "libtesseract 缺失".to_string()),
        ),
        ("panic", FaultMode::Panic("unexpected None".to_string())),
        ("opaque", FaultMode::OpaquePanic),
        ("empty", FaultMode::Empty),
    ];

    for (name, mode) in &modes {
        let mode = mode.clone();
        manager
            .register_fn(name, move |_| {
                Ok(Arc::new(FaultyPlugin::new(mode.clone())) as Arc<dyn Plugin>)
            })
            .await;
        assert!(manager.load(&PluginManifest::new(*name, "", "1.0.0")).await);
    }

    for (name, _) in &modes {
        let outcome = manager.execute(name, "run", json!({}), Device::Baseline).await;
        assert!(!outcome.ok, "{} should fail", name);
        assert!(outcome.error_kind.is_some());
        let message = outcome.error_message.unwrap();
        assert!(!message.trim().is_empty(), "{} has empty message", name);

        // 默认策略下插件保持可用
        assert!(manager.registry().is_available(name).await);
    }

    let summary = manager.summary().await;
    assert_eq!(summary.total_errors, modes.len() as u64);
    assert!(summary.healthy);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_and_executions() {
    let manager = manager_without_accelerator();
    setup_ocr_and_tracker(&manager).await;

    let tasks: Vec<_> = (0..120)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                match i % 4 {
                    0 => {
                        let outcome = manager
                            .execute("ocr", "extract", json!({"image": i}), Device::Accelerated)
                            .await;
                        assert!(outcome.ok);
                    }
                    1 => {
                        assert!(manager.get_status("ocr").await.is_some());
                    }
                    2 => {
                        assert_eq!(manager.list_all().await.len(), 2);
                    }
                    _ => {
                        let outcome = manager
                            .execute("tracker", "track", json!({}), Device::Baseline)
                            .await;
                        assert_eq!(outcome.error_kind, Some(ErrorKind::PluginUnavailable));
                    }
                }
            })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(10), join_all(tasks))
        .await
        .expect("concurrent access should not deadlock");
    assert!(results.into_iter().all(|r| r.is_ok()));

    let record = manager.registry().get_status("ocr").await.unwrap();
    assert_eq!(record.success_count, 30);
    assert_eq!(record.fallback_count, 30);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_leave_consistent_state() {
    let manager = manager_without_accelerator();
    setup_ocr_and_tracker(&manager).await;
    let registry = manager.registry().clone();

    let tasks: Vec<_> = (0..100)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                match i % 3 {
                    0 => {
                        registry.mark_running("ocr").await;
                    }
                    1 => {
                        registry.mark_failed("ocr", &format!("writer {}", i)).await;
                    }
                    _ => {
                        registry.mark_unavailable("ocr", &format!("writer {}", i)).await;
                    }
                }
                registry.record_success("ocr", Some(1.0)).await;
            })
        })
        .collect();

    let results = tokio::time::timeout(Duration::from_secs(10), join_all(tasks))
        .await
        .expect("concurrent writers should not deadlock");
    assert!(results.into_iter().all(|r| r.is_ok()));

    let record = registry.get_status("ocr").await.unwrap();
    assert_eq!(record.success_count, 100);
    match record.state {
        PluginState::Failed | PluginState::Unavailable => {
            assert!(record.unavailable_reason.unwrap().starts_with("writer"));
            assert!(!record.has_instance);
        }
        _ => assert!(record.unavailable_reason.is_none()),
    }

    let last = registry.transitions("ocr").await.pop().unwrap();
    assert_eq!(last.to, record.state);
}

#[tokio::test]
async fn test_unregister_removes_plugin() {
    let manager = manager_without_accelerator();
    setup_ocr_and_tracker(&manager).await;

    assert!(manager.unregister("ocr").await);
    assert!(manager.get_status("ocr").await.is_none());

    let outcome = manager
        .execute("ocr", "extract", json!({}), Device::Baseline)
        .await;
    assert_eq!(outcome.error_kind, Some(ErrorKind::PluginUnavailable));

    let err = manager.reload("ocr").await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
    assert!(!manager.unregister("ocr").await);
}

#[tokio::test]
async fn test_manager_from_host_config() {
    let mut config = HostConfig::default();
    config.probe.accelerator_override = Some(false);
    config.registry.runtime_fault_policy = RuntimeFaultPolicy::MarkFailed;

    let manager = PluginManager::new(&config);
    assert!(!manager.probe().accelerator_available());
    assert_eq!(manager.executor().policy(), RuntimeFaultPolicy::MarkFailed);

    manager
        .register_fn("faulty", |_| {
            Ok(Arc::new(FaultyPlugin::runtime("bad input")) as Arc<dyn Plugin>)
        })
        .await;
    assert!(manager.load(&PluginManifest::new("faulty", "", "1.0.0")).await);

    manager.execute("faulty", "run", json!({}), Device::Baseline).await;
    let status = manager.get_status("faulty").await.unwrap();
    assert_eq!(status.state, PluginState::Failed);
    assert!(!manager.summary().await.healthy);

    assert!(manager.reload("faulty").await.unwrap());
    assert!(manager.registry().is_available("faulty").await);
}
