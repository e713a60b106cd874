//! Diesel schema for task persistence.

diesel::table! {
    /// Task lifecycle records.
    tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Submitting principal.
        #[max_length = 255]
        owner_id -> Varchar,
        /// Input reference.
        source_uri -> Text,
        /// Output reference, set only when completed.
        result_uri -> Nullable<Text>,
        /// Lifecycle status.
        #[max_length = 32]
        status -> Varchar,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}
