const ENQUEUE_PROCESSING_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/ENQUEUE_PROCESSING.lua"
));
const FINISH_PROCESSING_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/FINISH_PROCESSING.lua"
));
const REQUEUE_FOR_DELIVERY_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/REQUEUE_FOR_DELIVERY.lua"
));
const MERGE_QUEUE_SCRIPT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/scripts/MERGE_QUEUE.lua"
));

pub fn enqueue_processing_script() -> &'static str {
    ENQUEUE_PROCESSING_SCRIPT
}

pub fn finish_processing_script() -> &'static str {
    FINISH_PROCESSING_SCRIPT
}

pub fn requeue_for_delivery_script() -> &'static str {
    REQUEUE_FOR_DELIVERY_SCRIPT
}

pub fn merge_queue_script() -> &'static str {
    MERGE_QUEUE_SCRIPT
}
