//! Loading a [`RangesManagingCollection`] from a [`LogSource`].

use anyhow::{Result, bail};
use tracing::{debug, warn};

use crate::containers::{AddOutcome, RangesManagingCollection};
use crate::sources::{LogEvent, LogSource};

/// What happened to the messages delivered during a fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillStats {
    pub ranges: usize,
    pub appended: usize,
    pub replaced: usize,
    pub unchanged: usize,
    pub ignored: usize,
    /// Messages dropped because their time went backwards
    pub rejected: usize,
}

impl FillStats {
    fn record(&mut self, outcome: AddOutcome) {
        match outcome {
            AddOutcome::Appended => self.appended += 1,
            AddOutcome::Replaced => self.replaced += 1,
            AddOutcome::Unchanged => self.unchanged += 1,
            AddOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Fill every incomplete range of `collection`, highest priority first.
///
/// Each range is streamed from its last read position, so a window that
/// only grew re-reads nothing it already holds. A source error aborts the
/// fill; the range being loaded keeps whatever it received so far.
pub async fn fill_collection<S>(
    collection: &mut RangesManagingCollection,
    source: &S,
    ignore_message_time_for_hash: bool,
) -> Result<FillStats>
where
    S: LogSource + ?Sized,
{
    let mut stats = FillStats::default();
    while let Some(mut fill) = collection.get_next_range_to_fill()? {
        stats.ranges += 1;
        let end = fill.desirable_range()?.end;
        let from = fill.last_read_position()?;
        let inherited_time = fill.last_message()?.map(|m| m.time);
        debug!(source = %source.name(), range = ?fill.id(), from, end, "filling range");

        let mut events = source.stream(from, inherited_time).await;
        loop {
            match events.recv().await {
                Some(LogEvent::Message(message)) => {
                    if message.position >= end {
                        fill.complete()?;
                        break;
                    }
                    match fill.add(message.shared(), ignore_message_time_for_hash) {
                        Ok(outcome) => stats.record(outcome),
                        Err(err) if err.is_time_constraint() => {
                            warn!(source = %source.name(), %err, "skipping out of order message");
                            stats.rejected += 1;
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Some(LogEvent::Error(err)) => bail!("{}: {}", source.name(), err),
                Some(LogEvent::EndOfStream) | None => {
                    fill.complete()?;
                    break;
                }
            }
        }
        fill.dispose()?;
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    use super::*;
    use crate::containers::test_utils::positions;
    use crate::containers::{MergingCollection, MessagesCollection, SimpleMergingCollection};
    use crate::message::Message;
    use crate::sources::file::FileSource;

    /// In-memory source that records where each stream started.
    struct VecSource {
        messages: Vec<Message>,
        fail_after: Option<u64>,
        requests: Mutex<Vec<u64>>,
    }

    impl VecSource {
        fn new(messages: Vec<Message>) -> Self {
            Self {
                messages,
                fail_after: None,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn sequential(count: u64) -> Self {
            Self::new((0..count).map(|p| Message::new(p, at(p as i64), format!("line {p}"))).collect())
        }

        fn requests(&self) -> Vec<u64> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(seconds, 0).unwrap()
    }

    #[async_trait::async_trait]
    impl LogSource for VecSource {
        async fn stream(&self, from: u64, _inherited_time: Option<DateTime<Utc>>) -> mpsc::Receiver<LogEvent> {
            self.requests.lock().unwrap().push(from);
            let (tx, rx) = mpsc::channel(self.messages.len() + 2);
            for message in self.messages.iter().filter(|m| m.position >= from) {
                if self.fail_after.is_some_and(|p| message.position > p) {
                    tx.try_send(LogEvent::Error("connection reset".to_string())).unwrap();
                    break;
                }
                tx.try_send(LogEvent::Message(message.clone())).unwrap();
            }
            tx.try_send(LogEvent::EndOfStream).unwrap();
            rx
        }

        fn name(&self) -> String {
            "memory".to_string()
        }
    }

    #[tokio::test]
    async fn test_fill_loads_active_window_only() {
        let source = VecSource::sequential(10);
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(2, 5).unwrap();

        let stats = fill_collection(&mut collection, &source, false).await.unwrap();
        assert_eq!(stats.ranges, 1);
        assert_eq!(stats.appended, 3);
        assert!(collection.is_fully_loaded());
        assert_eq!(positions(collection.forward(0, collection.count())), vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_grown_window_streams_only_the_gap() {
        let source = VecSource::sequential(10);
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 5).unwrap();
        fill_collection(&mut collection, &source, false).await.unwrap();

        collection.set_active_range(0, 8).unwrap();
        let stats = fill_collection(&mut collection, &source, false).await.unwrap();
        assert_eq!(stats.appended, 3);
        assert_eq!(source.requests(), vec![0, 5]);
        assert_eq!(positions(collection.forward(0, collection.count())), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_source_error_releases_the_lease() {
        let mut source = VecSource::sequential(10);
        source.fail_after = Some(3);
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 10).unwrap();

        let err = fill_collection(&mut collection, &source, false).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(collection.open_range().is_none());
        assert!(!collection.is_fully_loaded());
        assert_eq!(collection.count(), 4);
    }

    #[tokio::test]
    async fn test_out_of_order_messages_are_skipped() {
        let source = VecSource::new(vec![
            Message::new(0, at(10), "a"),
            Message::new(1, at(5), "late"),
            Message::new(2, at(11), "b"),
        ]);
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 3).unwrap();

        let stats = fill_collection(&mut collection, &source, false).await.unwrap();
        assert_eq!(stats.rejected, 1);
        assert_eq!(positions(collection.forward(0, collection.count())), vec![0, 2]);
    }

    fn continuation_file() -> tempfile::NamedTempFile {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "2024-01-01T10:00:00 first\ncontinuation\n2024-01-01T10:00:01 second\n"
        )
        .unwrap();
        file
    }

    fn loaded(collection: &RangesManagingCollection) -> Vec<(u64, DateTime<Utc>, String)> {
        collection
            .forward(0, collection.count())
            .map(|m| (m.message.position, m.message.time, m.message.text.clone()))
            .collect()
    }

    async fn load_at_once(source: &FileSource) -> Vec<(u64, DateTime<Utc>, String)> {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 1000).unwrap();
        fill_collection(&mut collection, source, false).await.unwrap();
        loaded(&collection)
    }

    #[tokio::test]
    async fn test_grown_window_matches_single_load() {
        let file = continuation_file();
        let source = FileSource::new(file.path().to_path_buf());
        let expected = load_at_once(&source).await;
        assert_eq!(expected.len(), 3);

        // 26 is the start of the untimed line, 30 falls inside it
        for first_end in [26, 30] {
            let mut collection = RangesManagingCollection::new();
            collection.set_active_range(0, first_end).unwrap();
            fill_collection(&mut collection, &source, false).await.unwrap();

            collection.set_active_range(0, 1000).unwrap();
            let stats = fill_collection(&mut collection, &source, false).await.unwrap();
            assert_eq!(stats.rejected, 0);
            assert_eq!(loaded(&collection), expected);
        }
    }

    #[tokio::test]
    async fn test_resumed_fill_keeps_untimed_tail() {
        let file = continuation_file();
        let source = FileSource::new(file.path().to_path_buf());
        let expected = load_at_once(&source).await;

        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 1000).unwrap();
        {
            let mut fill = collection.get_next_range_to_fill().unwrap().unwrap();
            let mut events = source.stream(0, None).await;
            for _ in 0..2 {
                if let Some(LogEvent::Message(m)) = events.recv().await {
                    fill.add(m.shared(), false).unwrap();
                }
            }
            fill.dispose().unwrap();
        }

        let stats = fill_collection(&mut collection, &source, false).await.unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.replaced, 0);
        assert_eq!(loaded(&collection), expected);
    }

    #[tokio::test]
    async fn test_window_starting_inside_a_line() {
        let file = continuation_file();
        let source = FileSource::new(file.path().to_path_buf());
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(5, 1000).unwrap();
        fill_collection(&mut collection, &source, false).await.unwrap();

        let lines = loaded(&collection);
        let positions: Vec<u64> = lines.iter().map(|(p, _, _)| *p).collect();
        assert_eq!(positions, vec![26, 39]);
        assert_eq!(lines[1].2, "2024-01-01T10:00:01 second");
    }

    #[tokio::test]
    async fn test_two_files_merge_by_time() {
        let mut a = tempfile::NamedTempFile::new().unwrap();
        let mut b = tempfile::NamedTempFile::new().unwrap();
        {
            use std::io::Write;
            write!(a, "2024-01-01T10:00:00 a1\n2024-01-01T10:00:02 a2\n").unwrap();
            write!(b, "2024-01-01T10:00:01 b1\n2024-01-01T10:00:03 b2\n").unwrap();
        }

        let mut collections = Vec::new();
        for path in [a.path(), b.path()] {
            let source = FileSource::new(path.to_path_buf());
            let mut collection = RangesManagingCollection::new();
            collection.set_active_range(0, u64::MAX).unwrap();
            fill_collection(&mut collection, &source, false).await.unwrap();
            collections.push(collection);
        }

        let merged = SimpleMergingCollection::new(
            collections.iter().map(|c| c as &dyn MessagesCollection).collect(),
        );
        let texts: Vec<&str> = merged
            .forward_entries(0, merged.count())
            .map(|e| &e.message.message.text[20..])
            .collect();
        assert_eq!(texts, vec!["a1", "b1", "a2", "b2"]);
    }
}
