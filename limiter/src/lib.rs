use middleware::entitlement::EntitlementGuard;

pub mod gate;
pub mod notifier;

pub mod middleware {
    pub mod entitlement;
}

pub fn entitlement_middleware() -> EntitlementGuard {
    EntitlementGuard
}
