//! Interval lifecycle for a group of local miners.
//!
//! Each interval: pull prices once, assemble and seal one record per miner
//! slot, and mine them until the interval is superseded or closed. Closing
//! joins every run, grades the results, submits the winners to the ledger
//! and keeps their slate for the next interval's records.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError, KEY_NUMBER_OF_MINERS, KEY_RECORDS_PER_BLOCK};
use crate::crypto::PowHasher;
use crate::grading::{GradingError, GradingRound};
use crate::mining::{spawn_mining, Miner, MiningError, MiningStats, MiningTask};
use crate::network::{Connection, ConnectionHandler, CoordinatorEvent, Message, NetworkError};
use crate::oracle::PriceSource;
use crate::types::{EntrySink, OraclePriceRecord, RecordError, Slate, SLATE_SIZE};
use crate::validator::Validator;

/// Coordinator errors
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Hash engine failure; mining must stop
    #[error("fatal: {0}")]
    Fatal(#[from] MiningError),
    /// Bad coordinator settings
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// This interval's records could not be built
    #[error("interval aborted: {0}")]
    Record(RecordError),
    /// Grading failed
    #[error(transparent)]
    Grading(#[from] GradingError),
}

impl CoordinatorError {
    /// Whether the process must stop
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<RecordError> for CoordinatorError {
    fn from(e: RecordError) -> Self {
        match e {
            RecordError::Hash(h) => Self::Fatal(MiningError::HashEngine(h)),
            other => Self::Record(other),
        }
    }
}

/// Outcome of a closed interval
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntervalSummary {
    /// Directory block height
    pub height: i32,
    /// Records mined
    pub candidates: usize,
    /// Records placed on the slate
    pub winners: usize,
    /// Top winners accepted by the ledger sink
    pub submitted: usize,
}

struct ActiveInterval {
    height: i32,
    tasks: Vec<MiningTask>,
}

/// Drives mining across intervals
pub struct MiningCoordinator {
    config: Config,
    hasher: Arc<dyn PowHasher>,
    validator: Validator,
    prices: Arc<dyn PriceSource>,
    sink: Arc<dyn EntrySink>,
    miner: Miner,
    miners: u32,
    records_per_block: usize,
    previous: Slate,
    active: Option<ActiveInterval>,
}

impl MiningCoordinator {
    /// Create a coordinator. `Miner.NumberOfMiners` defaults to 1 and
    /// `Miner.RecordsPerBlock` to the slate size.
    ///
    /// `Miner.RecordsPerBlock` limits the entries submitted per interval;
    /// the published slate always takes up to `SLATE_SIZE` winners.
    ///
    /// # Errors
    /// Returns error if either setting is present but malformed
    pub fn new(
        config: Config,
        hasher: Arc<dyn PowHasher>,
        prices: Arc<dyn PriceSource>,
        sink: Arc<dyn EntrySink>,
    ) -> Result<Self, CoordinatorError> {
        let miners = setting(&config, KEY_NUMBER_OF_MINERS, 1)?;
        let records_per_block = setting(&config, KEY_RECORDS_PER_BLOCK, SLATE_SIZE as u32)? as usize;
        let miner = Miner::new(Arc::clone(&hasher), Arc::new(MiningStats::new()));

        Ok(Self {
            config,
            hasher,
            validator: Validator::new(),
            prices,
            sink,
            miner,
            miners,
            records_per_block,
            previous: Slate::empty(),
            active: None,
        })
    }

    /// Winners of the last closed interval
    #[must_use]
    pub fn previous_slate(&self) -> &Slate {
        &self.previous
    }

    /// Height currently being mined
    #[must_use]
    pub fn current_height(&self) -> Option<i32> {
        self.active.as_ref().map(|a| a.height)
    }

    /// Mining totals
    #[must_use]
    pub fn stats(&self) -> &Arc<MiningStats> {
        self.miner.stats()
    }

    /// The record validator and its chain identity cache
    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Begin mining `height`. A running interval is closed first.
    ///
    /// Returns the number of mining runs started.
    ///
    /// # Errors
    /// Returns a fatal error on hash engine failure; other errors abort only
    /// this interval
    pub async fn start_interval(&mut self, height: i32) -> Result<usize, CoordinatorError> {
        if let Some(active) = self.active.take() {
            self.finish(active).await?;
        }

        let prices = self.prices.pull().map_err(RecordError::from)?;
        let mut tasks = Vec::with_capacity(self.miners as usize);
        for n in 0..self.miners {
            let mut record = OraclePriceRecord::assemble(
                n,
                height,
                &self.config,
                self.validator.chain_identity(),
                &self.previous,
                prices.clone(),
            )?;
            if let Err(e) = self.validator.check(&record, &self.config) {
                warn!(height, miner = n, error = %e, "Skipping invalid record");
                continue;
            }
            record.seal(self.hasher.as_ref())?;
            tasks.push(spawn_mining(self.miner.clone(), record));
        }

        info!(height, miners = tasks.len(), "Interval started");
        let started = tasks.len();
        self.active = Some(ActiveInterval { height, tasks });
        Ok(started)
    }

    /// Ask the runs for `height` to stop without grading them yet
    pub fn cancel_mining(&self, height: i32) {
        match &self.active {
            Some(active) if active.height == height => {
                for task in &active.tasks {
                    task.cancel_handle().cancel();
                }
                debug!(height, "Mining cancelled");
            }
            _ => debug!(height, "No mining to cancel"),
        }
    }

    /// Close `height`: join its runs, grade, submit and keep the slate
    ///
    /// # Errors
    /// Returns a fatal error if any run hit a hash engine failure
    pub async fn close_interval(
        &mut self,
        height: i32,
    ) -> Result<Option<IntervalSummary>, CoordinatorError> {
        match self.active.take() {
            Some(active) if active.height == height => self.finish(active).await.map(Some),
            other => {
                self.active = other;
                debug!(height, "Close for an interval that is not running");
                Ok(None)
            }
        }
    }

    /// Dispatch one event
    ///
    /// # Errors
    /// Returns whatever the triggered operation returns
    pub async fn handle_event(&mut self, event: CoordinatorEvent) -> Result<(), CoordinatorError> {
        match event {
            CoordinatorEvent::IntervalStarted { height, minute } => {
                debug!(height, minute, "Interval event");
                self.start_interval(height).await.map(|_| ())
            }
            CoordinatorEvent::CancelMining { height } => {
                self.cancel_mining(height);
                Ok(())
            }
            CoordinatorEvent::IntervalClosed { height } => {
                self.close_interval(height).await.map(|_| ())
            }
        }
    }

    /// Process events in order until the channel closes, then close the
    /// running interval.
    ///
    /// # Errors
    /// Returns the first fatal error
    pub async fn run(
        &mut self,
        mut events: mpsc::Receiver<CoordinatorEvent>,
    ) -> Result<(), CoordinatorError> {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle_event(event).await {
                if e.is_fatal() {
                    error!(error = %e, "Stopping miners");
                    return Err(e);
                }
                warn!(error = %e, "Interval skipped");
            }
        }

        if let Some(active) = self.active.take() {
            self.finish(active).await?;
        }
        info!("Event stream ended");
        Ok(())
    }

    async fn finish(&mut self, active: ActiveInterval) -> Result<IntervalSummary, CoordinatorError> {
        let ActiveInterval { height, tasks } = active;

        for task in &tasks {
            task.cancel_handle().cancel();
        }
        let mut mined = Vec::with_capacity(tasks.len());
        for task in tasks {
            mined.push(task.cancel_and_join().await?);
        }

        let mut round = GradingRound::new(
            height,
            SLATE_SIZE,
            0,
            self.validator.clone(),
            self.config.clone(),
        );
        let candidates = mined.len();
        for m in mined {
            if let Err(e) = round.submit(m.record) {
                warn!(height, error = %e, "Candidate rejected");
            }
        }
        round.close()?;

        let mut submitted = 0;
        let winners = round.grade()?;
        for (rank, opr) in winners.iter().take(self.records_per_block).enumerate() {
            debug!(height, rank, "{}", opr.short_string());
            match opr.to_entry() {
                Ok(entry) => match self.sink.submit(&entry) {
                    Ok(()) => submitted += 1,
                    Err(e) => warn!(height, rank, error = %e, "Ledger rejected entry"),
                },
                Err(e) => warn!(height, rank, error = %e, "Could not build entry"),
            }
        }
        let winners = winners.len();

        self.previous = round.publish()?;
        info!(height, candidates, winners, submitted, "Interval closed");

        Ok(IntervalSummary {
            height,
            candidates,
            winners,
            submitted,
        })
    }
}

fn setting(config: &Config, key: &str, default: u32) -> Result<u32, ConfigError> {
    if !config.contains(key) {
        return Ok(default);
    }
    let value = config.int(key)?;
    u32::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("{value} is out of range"),
    })
}

/// Forwards coordinator events arriving on a connection into a channel
#[derive(Clone, Debug)]
pub struct CoordinatorHandler {
    events: mpsc::Sender<CoordinatorEvent>,
}

impl CoordinatorHandler {
    /// Forward into `events`
    #[must_use]
    pub fn new(events: mpsc::Sender<CoordinatorEvent>) -> Self {
        Self { events }
    }
}

impl ConnectionHandler for CoordinatorHandler {
    fn on_connect(&self, conn: &Connection) {
        info!(conn = conn.id(), peer = %conn.peer_addr(), "Coordinator connected");
    }

    fn on_message(&self, conn: &Connection, msg: Message) {
        match msg.decode_event() {
            Ok(event) => {
                if let Err(e) = self.events.try_send(event) {
                    warn!(conn = conn.id(), error = %e, "Dropped coordinator event");
                }
            }
            Err(NetworkError::UnexpectedCommand(command)) => {
                debug!(conn = conn.id(), command, "Ignoring message");
            }
            Err(e) => warn!(conn = conn.id(), error = %e, "Bad coordinator event"),
        }
    }

    fn on_close(&self, conn: &Connection, err: Option<NetworkError>) {
        match err {
            None => info!(conn = conn.id(), "Coordinator disconnected"),
            Some(e) => warn!(conn = conn.id(), error = %e, "Coordinator connection lost"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::crypto::{HashEngine, LxrParams};
    use crate::oracle::{FixedPrices, PriceError};
    use crate::types::{AssetPrices, CollectingSink};

    struct BrokenFeed;

    impl PriceSource for BrokenFeed {
        fn pull(&self) -> Result<AssetPrices, PriceError> {
            Err(PriceError::Unavailable("offline".to_string()))
        }
    }

    fn engine() -> Arc<HashEngine> {
        let engine = HashEngine::new();
        engine.init(LxrParams::small(11)).unwrap();
        Arc::new(engine)
    }

    fn coordinator(
        hasher: Arc<dyn PowHasher>,
        prices: Arc<dyn PriceSource>,
    ) -> (MiningCoordinator, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::new());
        let config = Config::unit_test()
            .with(KEY_NUMBER_OF_MINERS, "3")
            .with(KEY_RECORDS_PER_BLOCK, "2");
        let coordinator = MiningCoordinator::new(config, hasher, prices, sink.clone()).unwrap();
        (coordinator, sink)
    }

    async fn mine_briefly() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_interval_lifecycle() {
        let (mut coordinator, sink) = coordinator(engine(), Arc::new(FixedPrices::with_defaults()));

        assert_eq!(coordinator.start_interval(10).await.unwrap(), 3);
        assert_eq!(coordinator.current_height(), Some(10));
        mine_briefly().await;

        let summary = coordinator.close_interval(10).await.unwrap().unwrap();
        assert_eq!(
            summary,
            IntervalSummary {
                height: 10,
                candidates: 3,
                winners: 3,
                submitted: 2,
            }
        );
        assert_eq!(sink.entries().len(), 2);
        assert_eq!(coordinator.previous_slate().filled(), 3);
        assert_eq!(coordinator.current_height(), None);
        assert_eq!(coordinator.stats().snapshot().runs, 3);
    }

    #[tokio::test]
    async fn test_next_interval_carries_slate() {
        let (mut coordinator, sink) = coordinator(engine(), Arc::new(FixedPrices::with_defaults()));

        coordinator.start_interval(1).await.unwrap();
        mine_briefly().await;
        coordinator.start_interval(2).await.unwrap();
        let slate = coordinator.previous_slate().clone();
        assert_eq!(slate.filled(), 3);

        coordinator.close_interval(2).await.unwrap();
        let entries = sink.entries();
        assert_eq!(entries.len(), 4);
        let later: OraclePriceRecord = serde_json::from_slice(&entries[3].content).unwrap();
        assert_eq!(later.block_height, 2);
        assert_eq!(later.previous_winners, slate);
    }

    #[tokio::test]
    async fn test_slate_fills_beyond_records_per_block() {
        let sink = Arc::new(CollectingSink::new());
        let config = Config::unit_test()
            .with(KEY_NUMBER_OF_MINERS, "12")
            .with(KEY_RECORDS_PER_BLOCK, "2");
        let mut coordinator = MiningCoordinator::new(
            config,
            engine(),
            Arc::new(FixedPrices::with_defaults()),
            sink.clone(),
        )
        .unwrap();

        assert_eq!(coordinator.start_interval(7).await.unwrap(), 12);
        mine_briefly().await;
        let summary = coordinator.close_interval(7).await.unwrap().unwrap();

        assert_eq!(summary.candidates, 12);
        assert_eq!(summary.winners, SLATE_SIZE);
        assert_eq!(summary.submitted, 2);
        assert_eq!(coordinator.previous_slate().filled(), SLATE_SIZE);
        assert_eq!(sink.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_close_other_height_is_ignored() {
        let (mut coordinator, _sink) = coordinator(engine(), Arc::new(FixedPrices::with_defaults()));
        coordinator.start_interval(5).await.unwrap();
        assert_eq!(coordinator.close_interval(4).await.unwrap(), None);
        assert_eq!(coordinator.current_height(), Some(5));
    }

    #[tokio::test]
    async fn test_cancel_then_close() {
        let (mut coordinator, _sink) = coordinator(engine(), Arc::new(FixedPrices::with_defaults()));
        coordinator.start_interval(5).await.unwrap();
        mine_briefly().await;
        coordinator.cancel_mining(5);

        let summary = coordinator.close_interval(5).await.unwrap().unwrap();
        assert_eq!(summary.candidates, 3);
    }

    #[tokio::test]
    async fn test_price_failure_aborts_interval_only() {
        let (mut coordinator, _sink) = coordinator(engine(), Arc::new(BrokenFeed));
        let err = coordinator.start_interval(1).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, CoordinatorError::Record(RecordError::Price(_))));
        assert_eq!(coordinator.current_height(), None);
    }

    #[tokio::test]
    async fn test_uninitialized_engine_is_fatal() {
        let (mut coordinator, _sink) =
            coordinator(Arc::new(HashEngine::new()), Arc::new(FixedPrices::with_defaults()));
        let err = coordinator.start_interval(1).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_run_processes_events() {
        let (mut coordinator, sink) = coordinator(engine(), Arc::new(FixedPrices::with_defaults()));
        let (tx, rx) = mpsc::channel(8);

        tx.send(CoordinatorEvent::IntervalStarted { height: 3, minute: 1 })
            .await
            .unwrap();
        tx.send(CoordinatorEvent::IntervalClosed { height: 3 }).await.unwrap();
        tx.send(CoordinatorEvent::IntervalStarted { height: 4, minute: 1 })
            .await
            .unwrap();
        drop(tx);

        coordinator.run(rx).await.unwrap();
        assert_eq!(sink.entries().len(), 4);
        assert_eq!(coordinator.current_height(), None);
    }

    #[tokio::test]
    async fn test_run_stops_on_fatal() {
        let (mut coordinator, _sink) =
            coordinator(Arc::new(HashEngine::new()), Arc::new(FixedPrices::with_defaults()));
        let (tx, rx) = mpsc::channel(8);
        tx.send(CoordinatorEvent::IntervalStarted { height: 1, minute: 1 })
            .await
            .unwrap();

        assert!(coordinator.run(rx).await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_bad_settings() {
        let config = Config::unit_test().with(KEY_NUMBER_OF_MINERS, "-2");
        let result = MiningCoordinator::new(
            config,
            engine(),
            Arc::new(FixedPrices::with_defaults()),
            Arc::new(CollectingSink::new()),
        );
        assert!(matches!(result, Err(CoordinatorError::Config(_))));
    }

    #[tokio::test]
    async fn test_handler_forwards_events() {
        let (tx, mut rx) = mpsc::channel(4);
        let handler = CoordinatorHandler::new(tx);
        let (stream, _other) = tokio::io::duplex(64);
        let (conn, _reader) = Connection::split(stream, "127.0.0.1:1".parse().unwrap());

        let event = CoordinatorEvent::IntervalStarted { height: 8, minute: 0 };
        handler.on_message(&conn, Message::forward_event(&event).unwrap());
        handler.on_message(&conn, Message::new(99, Vec::new()));

        assert_eq!(rx.recv().await, Some(event));
        assert!(rx.try_recv().is_err());
    }
}
