use candle_nn::VarMap;

/// Mode of a model.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ModelMode {
    /// Training-only behavior, such as dropout, is enabled.
    #[default]
    Train,

    /// Training-only behavior is disabled.
    Eval,
}

/// Models with named parameters that can be loaded from checkpoints.
///
/// The loader only relies on this capability set: named parameter
/// storage and a mode toggle. Models are typically built from a
/// `VarBuilder` that is backed by the returned `VarMap`.
pub trait StateDictModel {
    /// Named parameter storage of the model.
    ///
    /// Composite models return a map that shares the variables of the
    /// models that they wrap.
    fn var_map(&self) -> &VarMap;

    /// Get the current model mode.
    fn mode(&self) -> ModelMode;

    /// Set the model mode.
    fn set_mode(&mut self, mode: ModelMode);

    /// Switch the model to evaluation mode.
    fn eval(mut self) -> Self
    where
        Self: Sized,
    {
        self.set_mode(ModelMode::Eval);
        self
    }
}
