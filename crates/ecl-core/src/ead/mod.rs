pub mod schedule;

pub use schedule::{
    build_schedule, periods_to_maturity, AmortizationRow, AmortizationSchedule,
    BalanceSheetTreatment, EadConfig, FacilityTerms, RepaymentProfile,
};
