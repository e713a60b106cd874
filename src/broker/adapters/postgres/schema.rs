//! Diesel schema for the broker log.

diesel::table! {
    /// Append-only partitioned message log.
    broker_messages (message_offset) {
        /// Monotonic position, increasing within each partition.
        message_offset -> Int8,
        /// Topic name.
        #[max_length = 255]
        topic -> Varchar,
        /// Partition index.
        partition_id -> Int4,
        /// Routing key (task identifier).
        #[max_length = 255]
        message_key -> Varchar,
        /// JSON event payload.
        payload -> Jsonb,
        /// Out-of-band headers.
        headers -> Jsonb,
        /// Append timestamp.
        published_at -> Timestamptz,
    }
}

diesel::table! {
    /// Committed read position per consumer group and partition.
    broker_offsets (group_id, topic, partition_id) {
        /// Consumer group name.
        #[max_length = 255]
        group_id -> Varchar,
        /// Topic name.
        #[max_length = 255]
        topic -> Varchar,
        /// Partition index.
        partition_id -> Int4,
        /// Offset of the last acknowledged message.
        committed_offset -> Int8,
    }
}

diesel::table! {
    /// Partition ownership leases within a consumer group.
    broker_leases (group_id, topic, partition_id) {
        /// Consumer group name.
        #[max_length = 255]
        group_id -> Varchar,
        /// Topic name.
        #[max_length = 255]
        topic -> Varchar,
        /// Partition index.
        partition_id -> Int4,
        /// Owning member.
        member_id -> Uuid,
        /// Lease expiry.
        expires_at -> Timestamptz,
    }
}

diesel::table! {
    /// Live consumer-group members.
    broker_members (group_id, topic, member_id) {
        /// Consumer group name.
        #[max_length = 255]
        group_id -> Varchar,
        /// Topic name.
        #[max_length = 255]
        topic -> Varchar,
        /// Member identifier.
        member_id -> Uuid,
        /// Last heartbeat.
        heartbeat_at -> Timestamptz,
    }
}
