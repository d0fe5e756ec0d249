// Mirrors migrations/; keep in sync when the schema changes.

diesel::table! {
    targets (id) {
        id -> Int8,
        target_ip -> Inet,
        source -> Text,
        created_at -> Timestamp,
        last_measurement_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    measurements (id) {
        id -> Int8,
        target_id -> Int8,
        tool -> Text,
        started_at -> Timestamp,
        completed_at -> Nullable<Timestamp>,
        success -> Bool,
        raw_output -> Text,
        enriched -> Bool,
        enriched_at -> Nullable<Timestamp>,
        enrichment_attempts -> Int4,
        graph_built -> Bool,
        graph_built_at -> Nullable<Timestamp>,
    }
}

diesel::table! {
    hops (id) {
        id -> Int8,
        measurement_id -> Int8,
        hop_number -> Int4,
        hop_ip -> Nullable<Inet>,
        rtt_ms -> Nullable<Float8>,
        asn -> Nullable<Int8>,
        prefix -> Nullable<Text>,
        org_name -> Nullable<Text>,
        country_code -> Nullable<Text>,
    }
}

diesel::table! {
    asns (asn) {
        asn -> Int8,
        org_name -> Nullable<Text>,
        country_code -> Nullable<Text>,
        prefix_count -> Int4,
        neighbor_count -> Int4,
        source -> Nullable<Text>,
        peeringdb_id -> Nullable<Int8>,
        facility_count -> Int4,
        peering_policy -> Nullable<Text>,
        traffic_levels -> Nullable<Text>,
        irr_as_set -> Nullable<Text>,
        total_measurements -> Int8,
        avg_rtt_ms -> Nullable<Float8>,
        first_seen -> Timestamp,
        last_seen -> Timestamp,
        last_enriched -> Nullable<Timestamp>,
        last_enrichment_attempt -> Nullable<Timestamp>,
    }
}

diesel::table! {
    settings (key) {
        key -> Text,
        value -> Jsonb,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    enqueue_log (target_ip, source, priority) {
        target_ip -> Inet,
        source -> Text,
        priority -> Int2,
        enqueued_at -> Timestamp,
    }
}

diesel::table! {
    dns_targets (domain, target_ip) {
        domain -> Text,
        target_ip -> Inet,
        first_seen -> Timestamp,
        last_seen -> Timestamp,
        query_count -> Int8,
        last_qtype -> Nullable<Text>,
    }
}

diesel::joinable!(measurements -> targets (target_id));
diesel::joinable!(hops -> measurements (measurement_id));

diesel::allow_tables_to_appear_in_same_query!(
    targets,
    measurements,
    hops,
    asns,
    settings,
    enqueue_log,
    dns_targets,
);
