//! Centralized limits and thresholds for the `tsil` backend.

/// Maximum number of await points a single async state machine may
/// declare. Past this, `state` dispatch would need a jump table wider
/// than is worth generating a `switch` opcode for; the real TypeScript
/// compiler has no such cap, but a systems backend needs a documented
/// ceiling to size dispatch tables without reallocation.
pub const MAX_AWAIT_POINTS_PER_MACHINE: usize = 4096;

/// Maximum nesting depth of async arrows inside a single outer async
/// function, used to size the `outer` back-pointer chain walk and to
/// fail fast (AST-malformed) rather than recurse unboundedly on
/// pathological input.
pub const MAX_ASYNC_ARROW_NESTING: usize = 256;

/// Maximum number of hoisted locals + hoisted parameters per state
/// machine, bounding the field count of the synthesized value type.
pub const MAX_HOISTED_FIELDS_PER_MACHINE: usize = 8192;
