pub mod memory;
pub mod supabase;

pub use memory::{MemoryBackend, WriteCounts};
pub use supabase::{SupabaseClient, SupabaseError};
