use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempbridge::infrastructure::serial::{LineSettings, MockPort, MockPortOpener};
use tempbridge::{SerialReader, Temperature, TemperatureChannel, TemperatureUnit};

/// Concurrency and shutdown latency tests
#[cfg(test)]
mod performance_tests {
    use super::*;

    // Celsius readings stay below 1000, Fahrenheit ones at or above it, so a
    // value paired with the wrong unit would expose a torn update.
    fn reading_for(i: u32) -> Temperature {
        if i % 2 == 0 {
            Temperature::celsius((i % 1000) as f64).expect("finite")
        } else {
            Temperature::fahrenheit(1000.0 + i as f64).expect("finite")
        }
    }

    fn consistent(reading: &Temperature) -> bool {
        match reading.unit() {
            TemperatureUnit::Celsius => reading.value() < 1000.0,
            TemperatureUnit::Fahrenheit => reading.value() >= 1000.0,
        }
    }

    #[test]
    fn test_no_torn_reads_under_concurrent_publish() {
        let channel = TemperatureChannel::new();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let channel = channel.clone();
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut observed = 0u64;
                    while !done.load(Ordering::Acquire) {
                        if let Some(reading) = channel.read() {
                            assert!(consistent(&reading), "torn reading {:?}", reading);
                            observed += 1;
                        }
                    }
                    observed
                })
            })
            .collect();

        for i in 0..20_000 {
            channel.publish(reading_for(i));
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().expect("reader thread panicked");
        }
        assert!(consistent(&channel.read().expect("published")));
    }

    #[test]
    fn test_subscribe_during_publish() {
        let channel = TemperatureChannel::new();
        let done = Arc::new(AtomicBool::new(false));

        let churn = {
            let channel = channel.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    let id = channel.subscribe(|_, current| assert!(consistent(&current)));
                    assert!(channel.unsubscribe(id));
                }
            })
        };

        for i in 0..5_000 {
            channel.publish(reading_for(i));
        }
        done.store(true, Ordering::Release);
        churn.join().expect("subscriber thread panicked");
        assert_eq!(channel.listener_count(), 0);
    }

    #[test]
    fn test_close_is_prompt() {
        let port = MockPort::new().with_idle_delay(Duration::from_millis(20));
        let channel = TemperatureChannel::new();
        let mut reader = SerialReader::new(
            Arc::new(MockPortOpener::new(port)),
            LineSettings::default(),
            channel,
        );
        reader.connect("/dev/ttyUSB0").expect("connect");

        let start = Instant::now();
        reader.close().expect("close");
        let elapsed = start.elapsed();

        // Bounded by one pending read.
        assert!(elapsed < Duration::from_millis(500), "close took {:?}", elapsed);
    }

    #[test]
    fn test_parse_throughput() {
        let parser = tempbridge::LineParser::new();
        let start = Instant::now();
        for i in 0..10_000 {
            let line = if i % 3 == 0 { "noise".to_string() } else { format!("+{:05.2}C", (i % 100) as f64) };
            let _ = parser.parse(&line);
        }
        let elapsed = start.elapsed();

        let stats = parser.stats();
        assert_eq!(stats.accepted + stats.rejected_shape + stats.rejected_numeric, 10_000);
        assert!(elapsed < Duration::from_secs(1), "parsing too slow: {:?}", elapsed);
    }
}
