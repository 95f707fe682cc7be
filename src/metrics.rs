use lazy_static::lazy_static;
use prometheus::{opts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    // 기본 레지스트리에 자동 등록하지 않고, register_custom_metrics 에서 수동 등록합니다.

    /// Rooms newly added to the processing queue.
    pub static ref ROOMS_ENQUEUED_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("rooms_enqueued_total", "Rooms newly added to the processing queue")).unwrap();

    /// Enqueue attempts for rooms that were already queued.
    pub static ref DUPLICATE_ENQUEUE_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("duplicate_enqueue_total", "Enqueue attempts for rooms already queued")).unwrap();

    /// Battle feed rooms skipped because their last battle was already reported.
    pub static ref ROOMS_SKIPPED_ALREADY_REPORTED_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("rooms_skipped_already_reported_total", "Feed rooms whose hostility predates the last reported battle end")).unwrap();

    pub static ref BATTLES_FINISHED_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("battles_finished_total", "Battles finalized, by outcome"),
            &["outcome"],
        )
        .unwrap();

    pub static ref ROOMS_ABANDONED_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("rooms_abandoned_total", "Rooms dropped because their history never appeared")).unwrap();

    pub static ref ROOMS_DROPPED_MISSING_STATE_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("rooms_dropped_missing_state_total", "Queued rooms dropped because their state had expired")).unwrap();

    pub static ref HISTORY_FETCH_ERRORS_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("history_fetch_errors_total", "Room history fetches that failed")).unwrap();

    /// Creeps whose body matched no role.
    pub static ref UNCLASSIFIED_UNITS_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("unclassified_units_total", "Creeps whose body matched no known role")).unwrap();

    pub static ref BATTLES_REPORTED_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("battles_reported_total", "Finished battles handed to delivery")).unwrap();

    pub static ref BATTLES_SKIPPED_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("battles_skipped_total", "Finished battles not worth reporting")).unwrap();

    pub static ref CORRUPT_REPORTS_TOTAL: IntCounter =
        IntCounter::with_opts(opts!("corrupt_reports_total", "Reporting queue entries that failed to parse")).unwrap();

    pub static ref DELIVERY_SENT_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("delivery_sent_total", "Messages delivered, by channel"),
            &["channel"],
        )
        .unwrap();

    pub static ref DELIVERY_FAILED_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("delivery_failed_total", "Delivery attempts that failed and stay queued, by channel"),
            &["channel"],
        )
        .unwrap();

    /// Rooms seen in the processing queue at the start of the last pass.
    pub static ref PROCESSING_QUEUE_LENGTH: IntGauge =
        IntGauge::with_opts(opts!("processing_queue_length", "Processing queue length at the start of the last pass")).unwrap();
}

pub fn register_custom_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(ROOMS_ENQUEUED_TOTAL.clone()))?;
    registry.register(Box::new(DUPLICATE_ENQUEUE_TOTAL.clone()))?;
    registry.register(Box::new(ROOMS_SKIPPED_ALREADY_REPORTED_TOTAL.clone()))?;
    registry.register(Box::new(BATTLES_FINISHED_TOTAL.clone()))?;
    registry.register(Box::new(ROOMS_ABANDONED_TOTAL.clone()))?;
    registry.register(Box::new(ROOMS_DROPPED_MISSING_STATE_TOTAL.clone()))?;
    registry.register(Box::new(HISTORY_FETCH_ERRORS_TOTAL.clone()))?;
    registry.register(Box::new(UNCLASSIFIED_UNITS_TOTAL.clone()))?;
    registry.register(Box::new(BATTLES_REPORTED_TOTAL.clone()))?;
    registry.register(Box::new(BATTLES_SKIPPED_TOTAL.clone()))?;
    registry.register(Box::new(CORRUPT_REPORTS_TOTAL.clone()))?;
    registry.register(Box::new(DELIVERY_SENT_TOTAL.clone()))?;
    registry.register(Box::new(DELIVERY_FAILED_TOTAL.clone()))?;
    registry.register(Box::new(PROCESSING_QUEUE_LENGTH.clone()))?;
    Ok(())
}
