pub mod eal;
pub mod eth;
pub mod lcore;
pub mod mbuf;
pub mod pktmbuf;
pub mod queue;
