use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::checkpoint::{
    AssignError, CheckpointError, CheckpointLoader, Hardware, LoadCheckpointError,
};
use crate::error::BoxedError;
use crate::model::StateDictModel;
use crate::repository::repo::Repo;

static LNET_CHECKPOINT: &str = "LNet.pth";
static ENET_CHECKPOINT: &str = "ENet.pth";
static DNET_CHECKPOINT: &str = "DNet.pt";

/// Constructors for the talking-head networks.
///
/// The loader does not know about the network architectures. It only
/// constructs networks through this trait and loads their parameters
/// through [`StateDictModel`].
pub trait RetalkingNetworks {
    /// Lip-sync network.
    type LNet: StateDictModel;

    /// Enhancement network that wraps the lip-sync network.
    type ENet: StateDictModel;

    /// Expression editing network.
    type DNet: StateDictModel;

    /// Construct the lip-sync network.
    fn lnet(&self) -> Result<Self::LNet, BoxedError>;

    /// Construct the enhancement network.
    ///
    /// * `lnet` - The lip-sync network, its parameters must be shared
    ///   with the enhancement network under the `low_res` prefix.
    fn enet(&self, lnet: Self::LNet) -> Result<Self::ENet, BoxedError>;

    /// Construct the expression editing network.
    fn dnet(&self) -> Result<Self::DNet, BoxedError>;
}

/// Network loading errors.
#[derive(Debug, Snafu)]
pub enum LoadNetworkError {
    #[snafu(display("Cannot assign {network} parameters: {}", path.to_string_lossy()))]
    AssignParameters {
        source: AssignError,
        network: &'static str,
        path: PathBuf,
    },

    #[snafu(display("Cannot build {network}"))]
    BuildNetwork {
        source: BoxedError,
        network: &'static str,
    },

    #[snafu(display("Cannot load {network} checkpoint"))]
    LoadCheckpoint {
        source: LoadCheckpointError,
        network: &'static str,
    },

    #[snafu(display("Cannot load {network} checkpoint"))]
    LoadRaw {
        source: CheckpointError,
        network: &'static str,
    },
}

/// Errors while resolving checkpoint paths.
#[derive(Debug, Snafu)]
pub enum NetworkPathsError {
    #[snafu(display("Cannot get checkpoint from repository: {name}"))]
    GetCheckpoint { source: BoxedError, name: String },

    #[snafu(display("Checkpoint does not exist in repository: {name}"))]
    NonExistentCheckpoint { name: String },
}

/// Checkpoint paths of the talking-head networks.
///
/// Serialized field names are those of the inference arguments
/// (`LNet_path`, `ENet_path` and `DNet_path`).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkPaths {
    #[serde(rename = "LNet_path")]
    lnet_path: PathBuf,

    #[serde(rename = "ENet_path")]
    enet_path: PathBuf,

    #[serde(rename = "DNet_path")]
    dnet_path: PathBuf,
}

impl NetworkPaths {
    /// Create checkpoint paths.
    pub fn new(
        lnet_path: impl Into<PathBuf>,
        enet_path: impl Into<PathBuf>,
        dnet_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lnet_path: lnet_path.into(),
            enet_path: enet_path.into(),
            dnet_path: dnet_path.into(),
        }
    }

    /// Get the checkpoints with their conventional names from a repository.
    ///
    /// The repository must contain `LNet.pth`, `ENet.pth` and `DNet.pt`.
    pub fn from_repo(repo: &impl Repo) -> Result<Self, NetworkPathsError> {
        let checkpoint = |name: &str| -> Result<PathBuf, NetworkPathsError> {
            repo.file(name)
                .context(GetCheckpointSnafu { name })?
                .ok_or_else(|| NetworkPathsError::NonExistentCheckpoint {
                    name: name.to_string(),
                })
        };

        Ok(Self {
            lnet_path: checkpoint(LNET_CHECKPOINT)?,
            enet_path: checkpoint(ENET_CHECKPOINT)?,
            dnet_path: checkpoint(DNET_CHECKPOINT)?,
        })
    }

    /// Path of the lip-sync network checkpoint.
    pub fn lnet_path(&self) -> &Path {
        &self.lnet_path
    }

    /// Path of the enhancement network checkpoint.
    pub fn enet_path(&self) -> &Path {
        &self.enet_path
    }

    /// Path of the expression editing network checkpoint.
    pub fn dnet_path(&self) -> &Path {
        &self.dnet_path
    }
}

/// Load the enhancement network with its lip-sync network.
///
/// The lip-sync network is constructed and loaded first. Then the
/// enhancement network is constructed around it and its checkpoint is
/// loaded into the composite. The `low_res` parameters of the enhancement
/// checkpoint are dropped by the default key rules, so the lip-sync
/// parameters are not overwritten.
///
/// Returns the enhancement network in evaluation mode.
pub fn load_network<N, P>(
    loader: &CheckpointLoader<P>,
    networks: &N,
    paths: &NetworkPaths,
) -> Result<N::ENet, LoadNetworkError>
where
    N: RetalkingNetworks,
    P: Hardware,
{
    let lnet = networks
        .lnet()
        .context(BuildNetworkSnafu { network: "LNet" })?;
    let lnet = loader
        .load_checkpoint(paths.lnet_path(), lnet)
        .context(LoadCheckpointSnafu { network: "LNet" })?;

    let enet = networks
        .enet(lnet)
        .context(BuildNetworkSnafu { network: "ENet" })?;
    let enet = loader
        .load_checkpoint(paths.enet_path(), enet)
        .context(LoadCheckpointSnafu { network: "ENet" })?;

    Ok(enet.eval())
}

/// Load the expression editing network.
///
/// DNet checkpoints store their parameters under the DNet state dict
/// key (`net_G_ema` by default). Parameter names are used as-is.
///
/// Returns the network in evaluation mode.
pub fn load_dnet<N, P>(
    loader: &CheckpointLoader<P>,
    networks: &N,
    paths: &NetworkPaths,
) -> Result<N::DNet, LoadNetworkError>
where
    N: RetalkingNetworks,
    P: Hardware,
{
    let dnet = networks
        .dnet()
        .context(BuildNetworkSnafu { network: "DNet" })?;

    let dnet_key = loader.config().get_dnet_state_dict_key();
    let state_dict = loader
        .load_raw_sections(paths.dnet_path(), &[dnet_key])
        .context(LoadRawSnafu { network: "DNet" })?
        .section(dnet_key)
        .into_state_dict();
    loader
        .assign(&dnet, &state_dict)
        .context(AssignParametersSnafu {
            network: "DNet",
            path: paths.dnet_path(),
        })?;

    Ok(dnet.eval())
}
