// Entity Models - realtors and buyers
//
// Each entity has:
// - Stable identity (UUID) that never changes
// - A repository of free functions over the canonical SQLite connection
// - Derived views instead of embedded copies of other entities

pub mod buyer;
pub mod realtor;

pub use buyer::{
    all_buyers, buyers_for_realtor, complete_buyer_step, find_buyer_by_email, get_buyer,
    insert_buyer, BuyerAccount, BuyerProgress, BuyerStep, Role, TOTAL_STEPS,
};
pub use realtor::{
    all_realtors, create_realtor, find_realtor_by_email, get_realtor, insert_realtor,
    realtor_roster, RealtorAccount, RealtorRoster,
};
