use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::types::{EventCode, LogRecord, WallTime};

/// Allocated once; when full, each append overwrites the oldest record.
#[derive(Debug, Clone)]
pub struct EventLog {
    slots: Box<[Option<LogRecord>]>,
    // Next slot to write.
    head: usize,
    len: usize,
}

impl EventLog {
    /// A zero capacity is bumped to one so `append` always has a slot.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn append(&mut self, code: EventCode, time: WallTime) {
        let capacity = self.capacity();
        self.slots[self.head] = Some(LogRecord { time, code });
        self.head = (self.head + 1) % capacity;
        if self.len < capacity {
            self.len += 1;
        }
    }

    /// Records oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> + '_ {
        let capacity = self.capacity();
        let start = (self.head + capacity - self.len) % capacity;
        (0..self.len).filter_map(move |offset| self.slots[(start + offset) % capacity].as_ref())
    }

    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.iter().copied().collect()
    }
}

/// Cloneable handle to one [`EventLog`] shared by the tick loop and the
/// telemetry adapter. Every access holds the lock for one bounded operation.
#[derive(Debug, Clone)]
pub struct SharedEventLog {
    inner: Arc<Mutex<EventLog>>,
}

impl SharedEventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventLog::with_capacity(capacity))),
        }
    }

    pub fn append(&self, code: EventCode, time: WallTime) {
        self.lock().append(code, time);
    }

    /// Point-in-time copy; later appends never show up in the returned records.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.lock().snapshot()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // The log holds plain data, so a panic elsewhere cannot leave it torn.
    fn lock(&self) -> MutexGuard<'_, EventLog> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn codes(records: &[LogRecord]) -> Vec<EventCode> {
        records.iter().map(|record| record.code).collect()
    }

    #[test]
    fn keeps_insertion_order() {
        let mut log = EventLog::with_capacity(4);
        log.append(EventCode::DeviceOn, 1);
        log.append(EventCode::InputRelayOn, 2);

        assert_eq!(
            log.snapshot(),
            vec![
                LogRecord {
                    time: 1,
                    code: EventCode::DeviceOn
                },
                LogRecord {
                    time: 2,
                    code: EventCode::InputRelayOn
                },
            ]
        );
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut log = EventLog::with_capacity(3);
        log.append(EventCode::DeviceOn, 1);
        log.append(EventCode::InputRelayOn, 2);
        log.append(EventCode::OutputRelayOn, 3);
        log.append(EventCode::OutputRelayOff, 4);

        assert_eq!(log.len(), 3);
        assert_eq!(
            codes(&log.snapshot()),
            vec![
                EventCode::InputRelayOn,
                EventCode::OutputRelayOn,
                EventCode::OutputRelayOff,
            ]
        );
    }

    #[test]
    fn wraps_many_times() {
        let mut log = EventLog::with_capacity(5);
        for time in 0..23 {
            log.append(EventCode::MqttPublishError, time);
        }

        let times: Vec<_> = log.iter().map(|record| record.time).collect();
        assert_eq!(times, vec![18, 19, 20, 21, 22]);
    }

    #[test]
    fn zero_capacity_still_records_latest() {
        let mut log = EventLog::with_capacity(0);
        log.append(EventCode::DeviceOn, 1);
        log.append(EventCode::MqttConnected, 2);

        assert_eq!(log.capacity(), 1);
        assert_eq!(codes(&log.snapshot()), vec![EventCode::MqttConnected]);
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let log = SharedEventLog::with_capacity(2);
        log.append(EventCode::DeviceOn, 1);
        let before = log.snapshot();

        log.append(EventCode::MqttConnected, 2);
        log.append(EventCode::MqttDisconnected, 3);

        assert_eq!(codes(&before), vec![EventCode::DeviceOn]);
        assert_eq!(
            codes(&log.snapshot()),
            vec![EventCode::MqttConnected, EventCode::MqttDisconnected]
        );
    }

    #[test]
    fn clones_share_one_buffer() {
        let log = SharedEventLog::with_capacity(8);
        let telemetry = log.clone();

        telemetry.append(EventCode::MqttConnectError, 10);
        log.append(EventCode::InputRelayOn, 11);

        assert_eq!(telemetry.len(), 2);
        assert_eq!(
            codes(&log.snapshot()),
            vec![EventCode::MqttConnectError, EventCode::InputRelayOn]
        );
    }

    #[test]
    fn snapshots_stay_ordered_while_another_thread_appends() {
        const CAPACITY: usize = 8;
        const APPENDS: i64 = 50_000;

        let log = SharedEventLog::with_capacity(CAPACITY);
        let reader_log = log.clone();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader_done = Arc::clone(&done);

        let reader = std::thread::spawn(move || {
            while !reader_done.load(std::sync::atomic::Ordering::Acquire) {
                let records = reader_log.snapshot();
                assert!(records.len() <= CAPACITY);
                assert!(records.windows(2).all(|pair| pair[0].time < pair[1].time));
            }
        });

        for time in 0..APPENDS {
            log.append(EventCode::InputRelayOn, time);
        }
        done.store(true, std::sync::atomic::Ordering::Release);
        reader.join().unwrap();

        let times: Vec<WallTime> = log.snapshot().iter().map(|record| record.time).collect();
        let expected: Vec<WallTime> = (APPENDS - CAPACITY as i64..APPENDS).collect();
        assert_eq!(times, expected);
    }
}
