use serde::{Deserialize, Serialize};

/// A numerical code for a token supported by the settlement layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(pub u32);

impl Token {
    pub const BTC: Token = Token(0);
    pub const ETH: Token = Token(1);
    pub const DGX: Token = Token(256);
    pub const ABC: Token = Token(257);
    pub const REN: Token = Token(65536);
    pub const PQR: Token = Token(65537);
    pub const XYZ: Token = Token(65538);
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Token::BTC => write!(f, "BTC"),
            Token::ETH => write!(f, "ETH"),
            Token::DGX => write!(f, "DGX"),
            Token::ABC => write!(f, "ABC"),
            Token::REN => write!(f, "REN"),
            Token::PQR => write!(f, "PQR"),
            Token::XYZ => write!(f, "XYZ"),
            Token(code) => write!(f, "token({code})"),
        }
    }
}

/// A token pair packed into 64 bits: the priority token occupies the low 32
/// bits, the non-priority token the high 32 bits.
///
/// Both sides of a trade quote the same pair value; only the canonical
/// binary layout of a sell order swaps the halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair(pub u64);

impl TokenPair {
    pub const BTC_ETH: TokenPair = TokenPair::new(Token::BTC, Token::ETH);
    pub const ETH_DGX: TokenPair = TokenPair::new(Token::ETH, Token::DGX);
    pub const ETH_ABC: TokenPair = TokenPair::new(Token::ETH, Token::ABC);
    pub const ETH_REN: TokenPair = TokenPair::new(Token::ETH, Token::REN);
    pub const ETH_PQR: TokenPair = TokenPair::new(Token::ETH, Token::PQR);
    pub const ETH_XYZ: TokenPair = TokenPair::new(Token::ETH, Token::XYZ);

    /// Packs a pair from its non-priority and priority halves.
    pub const fn new(non_priority: Token, priority: Token) -> Self {
        TokenPair(((non_priority.0 as u64) << 32) | priority.0 as u64)
    }

    /// The priority token (low 32 bits).
    pub const fn priority(self) -> Token {
        Token((self.0 & 0xFFFF_FFFF) as u32)
    }

    /// The non-priority token (high 32 bits).
    pub const fn non_priority(self) -> Token {
        Token((self.0 >> 32) as u32)
    }

    /// The pair with its halves swapped, as used in the canonical layout of
    /// sell orders.
    pub const fn swapped(self) -> TokenPair {
        TokenPair((self.0 << 32) | (self.0 >> 32))
    }
}

impl std::fmt::Display for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.non_priority(), self.priority())
    }
}
