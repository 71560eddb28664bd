mod chain;
pub use chain::ProvideCredentialChain;

mod default;
pub use default::DefaultCredentialProvider;

mod ecs_ram_role;
pub use ecs_ram_role::EcsRamRoleCredentialProvider;

mod env;
pub use env::EnvCredentialProvider;

mod external_refresh;
pub use external_refresh::{ExternalRefreshCredentialProvider, RefreshCredential};

mod r#static;
pub use r#static::StaticCredentialProvider;

mod utils;
