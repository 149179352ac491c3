use ulid::Ulid;

/// Generates a new ULID, used to tag one invocation in the logs.
pub fn new_ulid() -> Ulid {
    Ulid::new()
}
