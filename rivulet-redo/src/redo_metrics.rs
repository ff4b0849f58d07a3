// Centralized metric name constants for the redo writer crate.

#[derive(Debug, Clone, Copy)]
pub struct Metric {
    pub name: &'static str,
    #[allow(dead_code)]
    pub description: &'static str,
}

pub const REDO_WRITE_ROWS_TOTAL: Metric = Metric {
    name: "rivulet_redo_write_rows_total",
    description: "Total number of row events handed to the redo log (per changefeed)",
};

pub const REDO_WRITE_BYTES_TOTAL: Metric = Metric {
    name: "rivulet_redo_write_bytes_total",
    description: "Total bytes appended to redo log files (per changefeed, type)",
};

pub const REDO_FLUSH_ERRORS_TOTAL: Metric = Metric {
    name: "rivulet_redo_flush_errors_total",
    description: "Total background flush failures (per changefeed)",
};

pub const REDO_FILE_ROTATE_TOTAL: Metric = Metric {
    name: "rivulet_redo_file_rotate_total",
    description: "Total number of redo file rotations (per changefeed, type)",
};

pub const REDO_FILE_GC_TOTAL: Metric = Metric {
    name: "rivulet_redo_file_gc_total",
    description: "Total number of sealed redo files removed by GC (per changefeed, type)",
};

pub const CLOUD_MIRROR_OBJECTS_TOTAL: Metric = Metric {
    name: "rivulet_redo_cloud_mirror_objects_total",
    description: "Total number of sealed redo files mirrored to the remote store (per changefeed, result)",
};
