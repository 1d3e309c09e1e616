use crate::{
    code::MessageCode,
    error::{CommsErr, Result},
    package::Package,
    tensor::Tensor,
};

/// How many epochs a tag tells apart. Tags travel as an `f32` scalar, which
/// holds every integer in `0..MAX_EPOCHS` exactly.
pub const MAX_EPOCHS: u64 = 1 << 24;

/// The typed view over a `Package`, one fixed layout per message code.
///
/// | message        | code              | tensors                 |
/// |----------------|-------------------|-------------------------|
/// | `ModelUpdate`  | `ParameterUpdate` | `[params]`              |
/// | `ModelUpdate`  | `ParameterUpdate` | `[params, epoch]`       |
/// | `Exit`         | `Exit`            | `[]` or `[params]`      |
/// | `Other`        | anything else     | untouched               |
#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    ModelUpdate {
        params: Vec<f32>,
        epoch: Option<u64>,
    },
    Exit {
        params: Option<Vec<f32>>,
    },
    Other(Package),
}

impl Msg {
    /// Reads the epoch tag of a `ParameterUpdate` package without consuming it.
    ///
    /// # Returns
    /// `None` for other codes or packages without the tag.
    pub fn epoch_of(pkg: &Package) -> Option<u64> {
        match (pkg.code(), pkg.tensors()) {
            (MessageCode::ParameterUpdate, [_, epoch]) => epoch_from(epoch),
            _ => None,
        }
    }

    fn unexpected_layout<T>(code: MessageCode, tensors: usize) -> Result<T> {
        Err(CommsErr::UnexpectedLayout { code, tensors })
    }
}

fn epoch_from(tensor: &Tensor) -> Option<u64> {
    tensor
        .as_scalar()
        .filter(|e| *e >= 0.0 && *e < MAX_EPOCHS as f32 && e.fract() == 0.0)
        .map(|e| e as u64)
}

impl From<Msg> for Package {
    fn from(msg: Msg) -> Self {
        match msg {
            Msg::ModelUpdate { params, epoch } => {
                let mut pkg = Package::new(MessageCode::ParameterUpdate);
                pkg.append_tensor(Tensor::flat(params));

                if let Some(epoch) = epoch {
                    pkg.append_tensor(Tensor::scalar(epoch as f32));
                }

                pkg
            }
            Msg::Exit { params } => {
                let mut pkg = Package::new(MessageCode::Exit);
                pkg.append_tensors(params.map(Tensor::flat));
                pkg
            }
            Msg::Other(pkg) => pkg,
        }
    }
}

impl TryFrom<Package> for Msg {
    type Error = CommsErr;

    fn try_from(pkg: Package) -> Result<Self> {
        let code = pkg.code();

        match code {
            MessageCode::ParameterUpdate => {
                let (_, _, tensors) = pkg.into_parts();
                let count = tensors.len();
                let mut tensors = tensors.into_iter();

                match (tensors.next(), tensors.next()) {
                    (Some(params), None) => Ok(Msg::ModelUpdate {
                        params: params.into_data(),
                        epoch: None,
                    }),
                    (Some(params), Some(epoch)) if count == 2 => match epoch_from(&epoch) {
                        Some(epoch) => Ok(Msg::ModelUpdate {
                            params: params.into_data(),
                            epoch: Some(epoch),
                        }),
                        None => Self::unexpected_layout(code, count),
                    },
                    _ => Self::unexpected_layout(code, count),
                }
            }
            MessageCode::Exit => {
                let (_, _, tensors) = pkg.into_parts();

                match tensors.len() {
                    0 => Ok(Msg::Exit { params: None }),
                    1 => Ok(Msg::Exit {
                        params: tensors.into_iter().next().map(Tensor::into_data),
                    }),
                    n => Self::unexpected_layout(code, n),
                }
            }
            _ => Ok(Msg::Other(pkg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_update_with_epoch_is_params_then_scalar() {
        let msg = Msg::ModelUpdate {
            params: vec![1.0, 2.0, 3.0],
            epoch: Some(2),
        };

        let pkg = Package::from(msg.clone());
        assert_eq!(pkg.code(), MessageCode::ParameterUpdate);
        assert_eq!(pkg.tensors().len(), 2);
        assert_eq!(pkg.tensors()[0].data(), &[1.0, 2.0, 3.0]);
        assert_eq!(Msg::epoch_of(&pkg), Some(2));

        let decoded = Package::decode(&pkg.encode(0).unwrap()).unwrap();
        assert_eq!(Msg::try_from(decoded).unwrap(), msg);
    }

    #[test]
    fn exit_may_carry_the_final_model() {
        for params in [None, Some(vec![0.5, 0.25])] {
            let msg = Msg::Exit { params };
            let pkg = Package::from(msg.clone());
            assert_eq!(pkg.code(), MessageCode::Exit);
            assert_eq!(Msg::try_from(pkg).unwrap(), msg);
        }
    }

    #[test]
    fn wrong_tensor_count_is_an_unexpected_layout() {
        let mut pkg = Package::new(MessageCode::ParameterUpdate);
        pkg.append_tensors([
            Tensor::flat(vec![1.0]),
            Tensor::scalar(0.0),
            Tensor::scalar(0.0),
        ]);

        assert!(matches!(
            Msg::try_from(pkg),
            Err(CommsErr::UnexpectedLayout { tensors: 3, .. })
        ));

        let empty = Package::new(MessageCode::ParameterUpdate);
        assert!(matches!(
            Msg::try_from(empty),
            Err(CommsErr::UnexpectedLayout { tensors: 0, .. })
        ));
    }

    #[test]
    fn fractional_epoch_tag_is_rejected() {
        let mut pkg = Package::new(MessageCode::ParameterUpdate);
        pkg.append_tensors([Tensor::flat(vec![1.0]), Tensor::scalar(1.5)]);

        assert_eq!(Msg::epoch_of(&pkg), None);
        assert!(Msg::try_from(pkg).is_err());
    }

    #[test]
    fn epoch_tags_are_exact_up_to_the_limit() {
        let last = Msg::ModelUpdate {
            params: vec![0.0],
            epoch: Some(MAX_EPOCHS - 1),
        };
        assert_eq!(Msg::epoch_of(&Package::from(last)), Some(MAX_EPOCHS - 1));

        // `MAX_EPOCHS + 1` rounds down to `MAX_EPOCHS` on the way, both are refused.
        for epoch in [MAX_EPOCHS, MAX_EPOCHS + 1] {
            let pkg = Package::from(Msg::ModelUpdate {
                params: vec![0.0],
                epoch: Some(epoch),
            });

            assert_eq!(Msg::epoch_of(&pkg), None);
            assert!(matches!(
                Msg::try_from(pkg),
                Err(CommsErr::UnexpectedLayout { tensors: 2, .. })
            ));
        }
    }

    #[test]
    fn unknown_codes_are_passed_through() {
        let mut pkg = Package::new(MessageCode::Other(99));
        pkg.append_tensor(Tensor::scalar(1.0));

        match Msg::try_from(pkg.clone()).unwrap() {
            Msg::Other(inner) => assert_eq!(inner, pkg),
            other => panic!("unexpected msg: {other:?}"),
        }
    }
}
