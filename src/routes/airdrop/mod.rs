mod handler;
mod model;

pub use handler::{
    create_airdrop,
    delete_airdrop,
    get_airdrop,
    get_stats,
    list_airdrops,
    update_airdrop,
};
pub use model::{
    AIRDROP_STATUSES, AIRDROP_TYPES, Airdrop, AirdropPayload, AirdropStats, NewAirdrop, Page,
    Pagination,
};
