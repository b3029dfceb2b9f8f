use rand::Rng;

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// 64-bit session identifier. Not a secret, only an identifier; zero is
/// reserved for "no session".
pub fn generate_guid() -> u64 {
    let mut rng = rand::thread_rng();
    loop {
        let guid: u64 = rng.gen();
        if guid != 0 {
            return guid;
        }
    }
}
