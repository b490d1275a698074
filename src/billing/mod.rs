pub mod api;
pub mod engine;
pub mod provisioner;
pub mod stripe;

pub use api::{activate, provision_billing, ActivateRequest, ProvisionBillingRequest};
pub use engine::{defaults_for, BillingModel, BillingModelDefaults};
pub use provisioner::{ActivationOutcome, BillingProvisioner, ProvisionInput, ProvisionOutcome};
pub use stripe::{
    CheckoutSession, CheckoutSessionDetails, PaymentProcessor, ProcessorHandle, StripeClient,
};
