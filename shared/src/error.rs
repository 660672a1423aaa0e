use thiserror::Error;

/// Estados de falha de uma oferta de troca atômica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferFault {
    /// A oferta expirou (altura limite ultrapassada)
    Expired,
    /// A oferta já foi aceita ou cancelada
    Consumed,
    /// O assinante não é o criador da oferta
    NotOwner,
    /// A transação referenciada não é uma oferta conhecida
    Missing,
}

impl std::fmt::Display for OfferFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Expired => write!(f, "expired"),
            Self::Consumed => write!(f, "consumed"),
            Self::NotOwner => write!(f, "not owner"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

/// Erros expostos pelo núcleo do nó
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Erro de I/O: {0}")]
    Io(String),

    #[error("Dados corrompidos: {0}")]
    Corruption(String),

    #[error("Validação falhou: {0}")]
    Validation(String),

    #[error("Assinatura inválida")]
    InvalidSignature,

    #[error("Endereço inválido: {0}")]
    InvalidAddress(String),

    #[error("UTXO não encontrada: {0}")]
    UtxoNotFound(String),

    #[error("UTXO já gasta: {0}")]
    AlreadySpent(String),

    #[error("Gasto duplo: {0}")]
    DoubleSpend(String),

    #[error("Fundos insuficientes: necessário {needed}, disponível {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Oferta em estado inválido: {0}")]
    OfferState(OfferFault),

    #[error("Pool em estado inválido: {0}")]
    PoolState(String),

    #[error("Banco de dados bloqueado pelo processo {0}")]
    LockHeld(u32),

    #[error("Voto duplicado de {0}")]
    DuplicateVote(String),

    #[error("Stream encerrado: {0}")]
    StreamClosed(String),

    #[error("Erro criptográfico: {0}")]
    CryptographicError(String),

    #[error("Erro de serialização: {0}")]
    SerializationError(String),

    #[error("Erro de rede: {0}")]
    NetworkError(String),
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}
