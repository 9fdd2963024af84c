pub const CREATE_DRIVERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS drivers (
    device_id TEXT PRIMARY KEY,
    driver_name TEXT NOT NULL,
    is_online BOOLEAN NOT NULL DEFAULT false,
    last_seen TIMESTAMPTZ NOT NULL,
    current_lat DOUBLE PRECISION,
    current_lng DOUBLE PRECISION,
    current_at TIMESTAMPTZ
);
"#;

pub const CREATE_LOCATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS locations (
    id BIGSERIAL PRIMARY KEY,
    device_id TEXT NOT NULL,
    driver_name TEXT NOT NULL,
    latitude DOUBLE PRECISION NOT NULL,
    longitude DOUBLE PRECISION NOT NULL,
    accuracy DOUBLE PRECISION NOT NULL DEFAULT 0,
    speed DOUBLE PRECISION NOT NULL DEFAULT 0,
    heading DOUBLE PRECISION NOT NULL DEFAULT 0,
    timestamp TIMESTAMPTZ NOT NULL,
    is_online BOOLEAN NOT NULL
);
"#;

pub const CREATE_LOCATIONS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS locations_device_timestamp_idx
    ON locations (device_id, timestamp DESC);
"#;

pub const UPSERT_DRIVER: &str = r#"
INSERT INTO drivers (device_id, driver_name, is_online, last_seen, current_lat, current_lng, current_at)
VALUES ($1, $2, $3, $4, $5, $6, $7)
ON CONFLICT (device_id) DO UPDATE
SET driver_name = $2,
    is_online = $3,
    last_seen = $4,
    current_lat = COALESCE($5, drivers.current_lat),
    current_lng = COALESCE($6, drivers.current_lng),
    current_at = COALESCE($7, drivers.current_at)
WHERE drivers.last_seen <= EXCLUDED.last_seen;
"#;

pub const SELECT_DRIVERS: &str = r#"
SELECT device_id, driver_name, is_online, last_seen, current_lat, current_lng, current_at
FROM drivers
ORDER BY last_seen DESC;
"#;

pub const INSERT_LOCATION: &str = r#"
INSERT INTO locations (device_id, driver_name, latitude, longitude, accuracy, speed, heading, timestamp, is_online)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9);
"#;

pub const INSERT_LOCATIONS_BATCH: &str = r#"
INSERT INTO locations (device_id, driver_name, latitude, longitude, accuracy, speed, heading, timestamp, is_online)
SELECT * FROM UNNEST(
    $1::text[], $2::text[], $3::float8[], $4::float8[], $5::float8[],
    $6::float8[], $7::float8[], $8::timestamptz[], $9::bool[]
);
"#;

pub const SELECT_LOCATION_HISTORY: &str = r#"
SELECT device_id, driver_name, latitude, longitude, accuracy, speed, heading, timestamp, is_online AS online
FROM locations
WHERE device_id = $1 AND ($2::timestamptz IS NULL OR timestamp >= $2)
ORDER BY timestamp DESC
LIMIT $3;
"#;

pub const SELECT_LATEST_PER_DEVICE: &str = r#"
SELECT DISTINCT ON (device_id)
    device_id, driver_name, latitude, longitude, accuracy, speed, heading, timestamp, is_online AS online
FROM locations
ORDER BY device_id, timestamp DESC, id DESC;
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_upsert_never_moves_last_seen_backwards() {
        let normalized: String = UPSERT_DRIVER.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(normalized.contains("ON CONFLICT (device_id) DO UPDATE"));
        assert!(normalized.ends_with("WHERE drivers.last_seen <= EXCLUDED.last_seen;"));
    }

    #[test]
    fn history_index_matches_history_query() {
        assert!(CREATE_LOCATIONS_INDEX.contains("(device_id, timestamp DESC)"));
        assert!(SELECT_LOCATION_HISTORY.contains("ORDER BY timestamp DESC"));
    }
}
