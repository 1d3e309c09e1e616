use std::fmt;

type CodeType = u32;

const PARAMETER_REQUEST: CodeType = 0;
const GRADIENT_UPDATE: CodeType = 1;
const PARAMETER_UPDATE: CodeType = 2;
const EVALUATE_PARAMS: CodeType = 3;
const EXIT: CodeType = 4;

/// The tag of every package.
///
/// The codec never interprets it; any value outside of the known ones is kept
/// as `Other` so the receiving side can decide what to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageCode {
    ParameterRequest,
    GradientUpdate,
    ParameterUpdate,
    EvaluateParams,
    Exit,
    Other(u32),
}

impl From<u32> for MessageCode {
    fn from(value: u32) -> Self {
        match value {
            PARAMETER_REQUEST => Self::ParameterRequest,
            GRADIENT_UPDATE => Self::GradientUpdate,
            PARAMETER_UPDATE => Self::ParameterUpdate,
            EVALUATE_PARAMS => Self::EvaluateParams,
            EXIT => Self::Exit,
            other => Self::Other(other),
        }
    }
}

impl From<MessageCode> for u32 {
    fn from(value: MessageCode) -> Self {
        match value {
            MessageCode::ParameterRequest => PARAMETER_REQUEST,
            MessageCode::GradientUpdate => GRADIENT_UPDATE,
            MessageCode::ParameterUpdate => PARAMETER_UPDATE,
            MessageCode::EvaluateParams => EVALUATE_PARAMS,
            MessageCode::Exit => EXIT,
            MessageCode::Other(code) => code,
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageCode::ParameterRequest => f.write_str("parameter_request"),
            MessageCode::GradientUpdate => f.write_str("gradient_update"),
            MessageCode::ParameterUpdate => f.write_str("parameter_update"),
            MessageCode::EvaluateParams => f.write_str("evaluate_params"),
            MessageCode::Exit => f.write_str("exit"),
            MessageCode::Other(code) => write!(f, "other({code})"),
        }
    }
}
