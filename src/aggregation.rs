use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::classifier::{ContentDescriptor, DescriptorKind};
use crate::config::AggregationConfig;
use crate::event::{IncomingEvent, UNKNOWN_SOURCE};

/// One multi-part post after its debounce window closed
#[derive(Debug, Clone)]
pub struct MergedGroup {
    pub group_id: String,
    pub descriptor: ContentDescriptor,
    /// First part of the group; replies are attached to it
    pub anchor: IncomingEvent,
    pub parts: usize,
}

/// Receives each finalized group exactly once.
#[async_trait]
pub trait GroupSink: Send + Sync {
    async fn on_group(&self, group: MergedGroup);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitStatus {
    Collecting,
    Finalizing,
    Done,
}

struct AggregationUnit {
    id: Uuid,
    events: Vec<IncomingEvent>,
    status: UnitStatus,
    /// Bumped on every rearm; an expiry carrying an older value is stale
    generation: u64,
    timer: Option<AbortHandle>,
    started: Instant,
}

impl AggregationUnit {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Vec::new(),
            status: UnitStatus::Collecting,
            generation: 0,
            timer: None,
            started: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct Expired {
    group_id: String,
    unit_id: Uuid,
    generation: u64,
}

struct Inner {
    units: Mutex<HashMap<String, AggregationUnit>>,
    expired_tx: mpsc::UnboundedSender<Expired>,
    debounce: Duration,
    max_collect: Option<Duration>,
}

/// Coalesces grouped events into one post per group identifier.
///
/// Every arrival cancels the group's timer and arms a new one. Timers never touch
/// the unit map themselves: they report expiry over a channel to a single
/// finalizer loop, which claims the unit under the lock and runs the sink outside it.
#[derive(Clone)]
pub struct AggregationBuffer {
    inner: Arc<Inner>,
}

impl AggregationBuffer {
    /// Must be called from within a tokio runtime; spawns the finalizer loop.
    pub fn new(config: &AggregationConfig, sink: Arc<dyn GroupSink>) -> Self {
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            units: Mutex::new(HashMap::new()),
            expired_tx,
            debounce: config.debounce(),
            max_collect: config.max_collect(),
        });

        tokio::spawn(run_finalizer(Arc::downgrade(&inner), expired_rx, sink));

        Self { inner }
    }

    /// Buffer a grouped event. Returns `false` when the event has no group
    /// identifier and the caller has to dispatch it directly.
    pub async fn on_event(&self, event: IncomingEvent) -> bool {
        let Some(group_id) = event.group_id.clone() else {
            return false;
        };

        let mut units = self.inner.units.lock().await;
        let unit = units
            .entry(group_id.clone())
            .and_modify(|unit| {
                if unit.status != UnitStatus::Collecting {
                    debug!(
                        "Group {} is already finalizing, opening a new unit",
                        group_id
                    );
                    *unit = AggregationUnit::new();
                }
            })
            .or_insert_with(AggregationUnit::new);

        unit.events.push(event);
        unit.generation += 1;
        if let Some(timer) = unit.timer.take() {
            timer.abort();
        }

        let now = Instant::now();
        let mut deadline = now + self.inner.debounce;
        if let Some(max_collect) = self.inner.max_collect {
            deadline = deadline.min(unit.started + max_collect);
        }

        let expired = Expired {
            group_id: group_id.clone(),
            unit_id: unit.id,
            generation: unit.generation,
        };
        let tx = self.inner.expired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = tx.send(expired);
        });
        unit.timer = Some(handle.abort_handle());

        debug!(
            "Buffered part {} of group {} (finalizing in {:?})",
            unit.events.len(),
            group_id,
            deadline.saturating_duration_since(now)
        );
        true
    }

    /// Number of groups currently tracked, whether collecting or finalizing.
    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.inner.units.lock().await.len()
    }
}

impl Inner {
    /// Claim a unit for finalization. Yields its events only when the expiry is
    /// current and the unit is still collecting.
    async fn begin_finalize(&self, expired: &Expired) -> Option<Vec<IncomingEvent>> {
        let mut units = self.units.lock().await;
        let Some(unit) = units.get_mut(&expired.group_id) else {
            debug!("Group {} expired after removal, ignoring", expired.group_id);
            return None;
        };
        if unit.id != expired.unit_id
            || unit.generation != expired.generation
            || unit.status != UnitStatus::Collecting
        {
            debug!("Stale expiry for group {}, ignoring", expired.group_id);
            return None;
        }

        unit.status = UnitStatus::Finalizing;
        unit.timer = None;
        Some(std::mem::take(&mut unit.events))
    }

    /// Drop the finalized unit unless a newer unit has taken its slot.
    async fn finish(&self, group_id: &str, unit_id: Uuid) {
        let mut units = self.units.lock().await;
        if let Some(unit) = units.get_mut(group_id) {
            if unit.id == unit_id {
                unit.status = UnitStatus::Done;
                units.remove(group_id);
            }
        }
    }
}

async fn run_finalizer(
    inner: Weak<Inner>,
    mut expired_rx: mpsc::UnboundedReceiver<Expired>,
    sink: Arc<dyn GroupSink>,
) {
    while let Some(expired) = expired_rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Some(events) = inner.begin_finalize(&expired).await else {
            continue;
        };

        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            let Expired {
                group_id, unit_id, ..
            } = expired;

            if let Some(group) = merge(&group_id, events) {
                info!(
                    "Finalizing group {} ({} parts, {} images)",
                    group_id,
                    group.parts,
                    group.descriptor.media.len()
                );
                let delivery = tokio::spawn(async move { sink.on_group(group).await });
                if let Err(e) = delivery.await {
                    error!("Group {} delivery failed: {}", group_id, e);
                }
            }

            inner.finish(&group_id, unit_id).await;
        });
    }
    debug!("Aggregation finalizer stopped");
}

/// Fold the parts of one group into a single descriptor.
///
/// Images keep arrival order. Body text joins every part's text in order, while
/// the caption is the first non-empty one. A group without images is unsupported,
/// even when its parts carried text.
pub fn merge(group_id: &str, events: Vec<IncomingEvent>) -> Option<MergedGroup> {
    let parts = events.len();
    let mut iter = events.into_iter();
    let anchor = iter.next()?;

    let mut media = Vec::new();
    let mut texts: Vec<String> = Vec::new();
    let mut caption: Option<String> = None;
    let mut source_label: Option<String> = None;

    for event in std::iter::once(&anchor).chain(iter.as_slice()) {
        media.extend(event.media.iter().filter(|m| m.is_image()).cloned());

        if let Some(text) = event.non_empty_text().or(event.non_empty_caption()) {
            texts.push(text.to_string());
        }
        if caption.is_none() {
            caption = event.non_empty_caption().map(str::to_string);
        }
        if source_label.is_none() {
            source_label = event.origin.as_ref().map(|o| o.label());
        }
    }

    let source_label = source_label.unwrap_or_else(|| UNKNOWN_SOURCE.to_string());
    let descriptor = if media.is_empty() {
        ContentDescriptor::unsupported(source_label)
    } else {
        ContentDescriptor {
            kind: DescriptorKind::Image,
            text: texts.join("\n"),
            caption: caption.unwrap_or_default(),
            media,
            source_label,
        }
    };

    Some(MergedGroup {
        group_id: group_id.to_string(),
        descriptor,
        anchor,
        parts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::fixtures::*;
    use crate::event::{ForwardOrigin, MediaKind, MediaRef};

    #[derive(Default)]
    struct RecordingSink {
        groups: std::sync::Mutex<Vec<MergedGroup>>,
        delay: Option<Duration>,
        panic: bool,
    }

    impl RecordingSink {
        fn groups(&self) -> Vec<MergedGroup> {
            self.groups.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GroupSink for RecordingSink {
        async fn on_group(&self, group: MergedGroup) {
            self.groups.lock().unwrap().push(group);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panic {
                panic!("sink failure");
            }
        }
    }

    fn config(debounce_ms: u64, max_collect_ms: u64) -> AggregationConfig {
        AggregationConfig {
            debounce_ms,
            max_collect_ms,
        }
    }

    fn buffer(sink: &Arc<RecordingSink>, cfg: AggregationConfig) -> AggregationBuffer {
        AggregationBuffer::new(&cfg, Arc::clone(sink) as Arc<dyn GroupSink>)
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ungrouped_event_is_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 0));

        assert!(!buf.on_event(text_event(1, "hi")).await);
        assert_eq!(buf.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_merged_into_one_dispatch() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 0));

        buf.on_event(photo_event(1, Some("g1"), &["img1"], "")).await;
        advance(400).await;
        buf.on_event(photo_event(2, Some("g1"), &["img2"], "breaking news"))
            .await;
        advance(400).await;
        buf.on_event(photo_event(3, Some("g1"), &[], "")).await;

        advance(1000).await;
        assert!(sink.groups().is_empty());

        advance(2000).await;
        let groups = sink.groups();
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.parts, 3);
        assert_eq!(group.anchor.message_id, 1);
        assert_eq!(group.descriptor.kind, DescriptorKind::Image);
        assert_eq!(
            group.descriptor.media,
            vec![MediaRef::photo("img1"), MediaRef::photo("img2")]
        );
        assert_eq!(group.descriptor.caption, "breaking news");
        assert_eq!(group.descriptor.text, "breaking news");
        assert_eq!(buf.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_arrival_restarts_the_window() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 0));

        for id in 0..4 {
            buf.on_event(photo_event(id, Some("g1"), &["img"], "")).await;
            advance(1500).await;
        }
        assert!(sink.groups().is_empty());

        advance(1000).await;
        let groups = sink.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].descriptor.media.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_longer_than_window_splits_the_group() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 0));

        buf.on_event(photo_event(1, Some("g1"), &["img1"], "first")).await;
        advance(3000).await;
        buf.on_event(photo_event(2, Some("g1"), &["img2"], "second")).await;
        advance(3000).await;

        let groups = sink.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].descriptor.media, vec![MediaRef::photo("img1")]);
        assert_eq!(groups[1].descriptor.media, vec![MediaRef::photo("img2")]);
        assert_eq!(groups[1].descriptor.caption, "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_groups_finalize_independently() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 0));

        buf.on_event(photo_event(1, Some("a"), &["a1"], "")).await;
        buf.on_event(photo_event(2, Some("b"), &["b1"], "")).await;
        buf.on_event(photo_event(3, Some("a"), &["a2"], "")).await;
        assert_eq!(buf.pending().await, 2);

        advance(2500).await;
        let mut groups = sink.groups();
        groups.sort_by(|x, y| x.group_id.cmp(&y.group_id));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].descriptor.media.len(), 2);
        assert_eq!(groups[1].descriptor.media.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collection_time_is_capped() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 3000));

        for id in 0..3 {
            buf.on_event(photo_event(id, Some("g1"), &["img"], "")).await;
            advance(1000).await;
        }
        advance(500).await;

        let groups = sink.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].parts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_part_during_finalization_opens_new_unit() {
        let sink = Arc::new(RecordingSink {
            delay: Some(Duration::from_millis(5000)),
            ..Default::default()
        });
        let buf = buffer(&sink, config(2000, 0));

        buf.on_event(photo_event(1, Some("g1"), &["img1"], "")).await;
        advance(3000).await;
        assert_eq!(sink.groups().len(), 1);

        buf.on_event(photo_event(2, Some("g1"), &["img2"], "")).await;
        advance(5000).await;
        // First dispatch finished; the second unit must survive its cleanup.
        assert_eq!(sink.groups().len(), 2);
        assert_eq!(buf.pending().await, 1);

        advance(3000).await;
        assert_eq!(buf.pending().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_removed_even_when_sink_panics() {
        let sink = Arc::new(RecordingSink {
            panic: true,
            ..Default::default()
        });
        let buf = buffer(&sink, config(2000, 0));

        buf.on_event(photo_event(1, Some("g1"), &["img1"], "")).await;
        advance(3000).await;

        assert_eq!(sink.groups().len(), 1);
        assert_eq!(buf.pending().await, 0);
    }

    fn expiry(group_id: &str, unit_id: Uuid, generation: u64) -> Expired {
        Expired {
            group_id: group_id.to_string(),
            unit_id,
            generation,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_expiries_are_ignored() {
        let sink = Arc::new(RecordingSink::default());
        let buf = buffer(&sink, config(2000, 0));

        let never_buffered = expiry("ghost", Uuid::new_v4(), 1);
        assert!(buf.inner.begin_finalize(&never_buffered).await.is_none());

        buf.on_event(photo_event(1, Some("g1"), &["img1"], "")).await;
        let (unit_id, first_generation) = {
            let units = buf.inner.units.lock().await;
            (units["g1"].id, units["g1"].generation)
        };
        buf.on_event(photo_event(2, Some("g1"), &["img2"], "")).await;

        let superseded = expiry("g1", unit_id, first_generation);
        assert!(buf.inner.begin_finalize(&superseded).await.is_none());
        let foreign_unit = expiry("g1", Uuid::new_v4(), first_generation + 1);
        assert!(buf.inner.begin_finalize(&foreign_unit).await.is_none());

        // Same expiries delivered through the finalizer loop
        for stale in [
            expiry("ghost", Uuid::new_v4(), 1),
            expiry("g1", unit_id, first_generation),
            expiry("g1", Uuid::new_v4(), first_generation + 1),
        ] {
            buf.inner.expired_tx.send(stale).unwrap();
        }
        advance(100).await;
        assert!(sink.groups().is_empty());
        assert_eq!(buf.pending().await, 1);

        advance(2500).await;
        let groups = sink.groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].parts, 2);
        assert_eq!(buf.pending().await, 0);
    }

    #[test]
    fn test_merge_without_images_is_unsupported() {
        let mut doc = photo_event(1, Some("g1"), &[], "report attached");
        doc.media = vec![MediaRef {
            file_id: "doc".to_string(),
            kind: MediaKind::Document,
        }];

        let group = merge("g1", vec![doc]).unwrap();
        assert_eq!(group.descriptor.kind, DescriptorKind::Unsupported);
    }

    #[test]
    fn test_merge_keeps_duplicates_and_first_origin() {
        let first = photo_event(1, Some("g1"), &["img1"], "");
        let mut second = photo_event(2, Some("g1"), &["img1"], "caption one");
        second.origin = Some(ForwardOrigin::Chat(channel("News", Some("news"))));
        let mut third = photo_event(3, Some("g1"), &["img3"], "caption two");
        third.origin = Some(ForwardOrigin::Chat(channel("Other", None)));

        let group = merge("g1", vec![first, second, third]).unwrap();
        assert_eq!(group.descriptor.media.len(), 3);
        assert_eq!(group.descriptor.media[0], group.descriptor.media[1]);
        assert_eq!(group.descriptor.text, "caption one\ncaption two");
        assert_eq!(group.descriptor.caption, "caption one");
        assert_eq!(group.descriptor.source_label, "@news");
    }

    #[test]
    fn test_merge_of_nothing_is_none() {
        assert!(merge("g1", Vec::new()).is_none());
    }
}
