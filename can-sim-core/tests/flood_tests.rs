// Flood engine settings, variable selection and sending
use can_sim_core::{
    CanTransport, FloodEngine, MetricsCollector, MockTransport, SimulatorConfig, SimulatorCore,
    SimulatorError, SimulatorSources,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn simulator(transport: Option<Arc<MockTransport>>) -> SimulatorCore {
    SimulatorCore::new(
        &SimulatorSources::live(fixture("tests.dbc"), fixture("tests.json")),
        transport.map(|t| t as Arc<dyn CanTransport>),
        SimulatorConfig::new(),
    )
    .unwrap()
}

fn params(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_no_settings() {
    let core = simulator(None);
    let flood = FloodEngine::new(&core, &params(&[])).unwrap();

    assert_eq!(flood.delay(), 100);
    assert_eq!(flood.rate(), 0);
    assert_eq!(flood.rate_factor(), 0.0);
    assert_eq!(flood.wait_time(), 0);
    assert_eq!(flood.use_interval(), 100);
    assert!(!flood.use_rate());
    assert!(!flood.burst_enabled());
    // Receive variables are never flooded
    assert_eq!(flood.variables().len(), 27);
    assert!(!flood.contains_variable("statusSpeed"));
}

#[test]
fn test_delay_settings() {
    let core = simulator(None);
    let mut flood = FloodEngine::new(&core, &params(&[])).unwrap();

    flood.set_bitrate(500_000);
    flood.set_delay(500);
    assert_eq!(flood.delay(), 500);
    flood.set_delay(300);
    assert_eq!(flood.delay(), 300);
    assert_eq!(flood.rate(), 0);
    assert_eq!(flood.rate_factor(), 0.0);
    assert_eq!(flood.wait_time(), 0);
    flood.set_delay(250);
    assert_eq!(flood.use_interval(), 250);
    assert!(!flood.use_rate());
}

#[test]
fn test_rate_settings() {
    let core = simulator(None);
    let mut flood = FloodEngine::new(&core, &params(&[])).unwrap();

    flood.set_bitrate(500_000);
    for (rate, expected_rate, factor) in [(40, 40, 5.0), (25, 25, 8.0), (100, 100, 2.0), (0, 1, 200.0)]
    {
        flood.set_rate(rate);
        assert_eq!(flood.rate(), expected_rate);
        assert_eq!(flood.rate_factor(), factor);
        assert!(flood.use_rate());
    }

    flood.set_bitrate(250_000);
    for (rate, expected_rate, factor) in [(40, 40, 10.0), (100, 100, 4.0), (0, 1, 400.0)] {
        flood.set_rate(rate);
        assert_eq!(flood.rate(), expected_rate);
        assert_eq!(flood.rate_factor(), factor);
        assert!(flood.use_rate());
    }

    flood.set_rate(75);
    assert_eq!(flood.rate(), 75);
    assert!((flood.rate_factor() - 5.33).abs() < 0.01);

    flood.set_rate(250);
    assert_eq!(flood.rate(), 100);
}

#[test]
fn test_bitrate_change_updates_rate() {
    let core = simulator(None);
    let mut flood = FloodEngine::new(&core, &params(&["rate=40"])).unwrap();
    assert!(!flood.use_rate());

    flood.set_bitrate(500_000);
    assert!(flood.use_rate());
    assert_eq!(flood.rate_factor(), 5.0);

    flood.set_bitrate(250_000);
    assert_eq!(flood.rate_factor(), 10.0);

    // Delay pacing stays in place when only the bitrate changes
    flood.set_delay(300);
    flood.set_bitrate(500_000);
    assert!(!flood.use_rate());
    assert_eq!(flood.use_interval(), 300);
}

#[test]
fn test_burst_mode() {
    let core = simulator(None);
    let mut flood = FloodEngine::new(&core, &params(&[])).unwrap();

    assert!(!flood.burst_enabled());
    flood.set_burst_len(300);
    assert!(flood.burst_enabled());
    assert_eq!(flood.burst_len(), 300);
    assert_eq!(flood.burst_delay(), 300);

    flood.set_burst_delay(900);
    assert_eq!(flood.burst_len(), 300);
    assert_eq!(flood.burst_delay(), 900);
}

#[test]
fn test_include_and_delay() {
    let core = simulator(None);
    let flood = FloodEngine::new(
        &core,
        &params(&["delay=500", "include=test2sig1,test4sig2,test10sig1", "burst-len=350"]),
    )
    .unwrap();

    assert_eq!(flood.delay(), 500);
    assert_eq!(flood.burst_len(), 350);
    assert_eq!(flood.burst_delay(), 350);

    assert_eq!(flood.variables().len(), 3);
    for name in ["test2sig1", "test4sig2", "test10sig1"] {
        assert!(flood.contains_variable(name), "{} missing", name);
    }
    for name in ["test2sig2", "test4sig1", "test10sig2"] {
        assert!(!flood.contains_variable(name), "{} included", name);
    }
}

#[test]
fn test_exclude_and_rate() {
    let core = simulator(None);
    let mut flood = FloodEngine::new(
        &core,
        &params(&[
            "rate=40",
            "exclude=test2sig1,test4sig2,test10sig1",
            "burst-len=550",
            "burst-delay=2350",
        ]),
    )
    .unwrap();

    // Without a bitrate the rate falls back to the delay
    assert_eq!(flood.rate(), 40);
    assert_eq!(flood.rate_factor(), 0.0);
    assert!(!flood.use_rate());

    flood.set_bitrate(500_000);
    flood.set_rate(40);
    assert_eq!(flood.rate_factor(), 5.0);
    assert_eq!(flood.calculate_delay("test1sig1"), 540);
    assert_eq!(flood.calculate_delay("test2sig1"), 460);
    assert_eq!(flood.calculate_delay("test8sig1"), 540);
    assert_eq!(flood.use_interval(), 540);
    assert_eq!(flood.calculate_delay("testing"), 0);
    assert_eq!(flood.burst_len(), 550);
    assert_eq!(flood.burst_delay(), 2350);

    for name in ["test2sig1", "test4sig2", "test10sig1"] {
        assert!(!flood.contains_variable(name), "{} included", name);
    }
    for name in ["test2sig2", "test4sig1", "test10sig2"] {
        assert!(flood.contains_variable(name), "{} missing", name);
    }
}

#[test]
fn test_filtered_messages_not_flooded() {
    let core = simulator(None);
    assert!(core.initialize_message_filter_list(&params(&["2", "4", "6", "8", "10"]), true, false));

    let flood = FloodEngine::new(&core, &params(&[])).unwrap();
    for odd in [1, 3, 5, 7, 9] {
        assert!(flood.contains_variable(&format!("test{}sig1", odd)));
    }
    for even in [2, 4, 6, 8, 10] {
        assert!(!flood.contains_variable(&format!("test{}sig1", even)));
        assert!(!flood.contains_variable(&format!("test{}sig2", even)));
    }

    // Only filtered variables requested: every unfiltered variable is used
    let flood = FloodEngine::new(&core, &params(&["include=test2sig1,test4sig1"])).unwrap();
    assert!(flood.contains_variable("test1sig1"));
    assert!(!flood.contains_variable("test2sig1"));
}

#[test]
fn test_everything_filtered() {
    let core = simulator(None);
    assert!(core.initialize_message_filter_list(&params(&["1"]), false, false));
    assert!(core.set_message_filter_state(1, true));

    let result = FloodEngine::new(&core, &params(&[]));
    assert!(matches!(result, Err(SimulatorError::FloodError(_))));
}

#[test]
fn test_filtered_include() {
    let core = simulator(None);
    assert!(core.initialize_message_filter_list(&params(&["1", "2"]), false, false));

    let flood =
        FloodEngine::new(&core, &params(&["include=test1sig1,test2sig2,test3sig1"])).unwrap();
    assert!(flood.contains_variable("test1sig1"));
    assert!(flood.contains_variable("test2sig2"));
    assert!(!flood.contains_variable("test3sig1"));
}

#[test]
fn test_invalid_params() {
    let core = simulator(None);
    for bad in ["delay=abc", "rate=fast", "burst-len=-1", "xyz"] {
        let result = FloodEngine::new(&core, &params(&[bad]));
        assert!(matches!(result, Err(SimulatorError::FloodError(_))), "{}", bad);
    }

    // Unknown keys are ignored, a bare number is a delay
    let flood = FloodEngine::new(&core, &params(&["speed=3", "250"])).unwrap();
    assert_eq!(flood.delay(), 250);
}

#[test]
fn test_flood_sends_random_values() {
    let transport = Arc::new(MockTransport::new(500_000));
    let core = simulator(Some(transport.clone()));
    let metrics = Arc::new(Mutex::new(MetricsCollector::new(500_000)));

    let mut flood = FloodEngine::new(&core, &params(&["delay=0", "include=test1sig1,test5sig2"]))
        .unwrap()
        .with_seed(7);
    flood.init_metrics(Arc::clone(&metrics));

    for _ in 0..50 {
        assert!(flood.flood_signal());
    }

    let sent = transport.sent_frames();
    assert_eq!(sent.len(), 50);
    assert!(sent.iter().all(|frame| frame.id == 1 || frame.id == 5));
    assert_eq!(flood.wait_time(), 0);

    let test1 = core.message_by_id(1).unwrap();
    let test5 = core.message_by_id(5).unwrap();
    assert_eq!(test1.successful() + test5.successful(), 50);
}

#[test]
fn test_flood_rate_pacing() {
    let transport = Arc::new(MockTransport::new(500_000));
    let core = simulator(Some(transport.clone()));

    let mut flood = FloodEngine::new(&core, &params(&["rate=100", "include=test2sig3"]))
        .unwrap()
        .with_seed(1);
    assert!(flood.use_rate());
    assert_eq!(flood.rate_factor(), 2.0);

    for _ in 0..5 {
        assert!(flood.flood_signal());
    }
    // 92 bits at 2 usec per bit
    assert_eq!(flood.wait_time(), 5 * 184);
}

#[test]
fn test_flood_bursts() {
    let transport = Arc::new(MockTransport::new(500_000));
    let core = simulator(Some(transport.clone()));
    let metrics = Arc::new(Mutex::new(MetricsCollector::new(500_000)));

    let mut flood = FloodEngine::new(
        &core,
        &params(&["delay=200", "burst-len=1000", "burst-delay=500", "include=test7sig1"]),
    )
    .unwrap()
    .with_seed(3);
    flood.init_metrics(Arc::clone(&metrics));

    for _ in 0..20 {
        flood.flood_signal();
    }

    // At least one silent window was added to the schedule
    assert!(flood.wait_time() > 20 * 200);
    let mut metrics = metrics.lock();
    let burst = metrics.burst_metrics();
    assert_eq!(burst.len, 1000);
    assert_eq!(burst.delay, 500);
    assert!(burst.total_count > 0);
    assert!(burst.min.is_some());
}
